//! Sled driver.
//!
//! Scripts are JSON lists of key-value operations applied in order. The
//! migration state and the lock live in a dedicated tree, so every driver
//! opened on the same database sees the same lock.
//!
//! ```json
//! [
//!   {"op": "put", "tree": "users", "key": "1", "value": "ada"},
//!   {"op": "remove", "key": "legacy"},
//!   {"op": "clear_tree", "tree": "sessions"},
//!   {"op": "drop_tree", "tree": "old_index"}
//! ]
//! ```
//!
//! Operations without a `tree` act on the default tree.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rkyv::{Archive, Deserialize, Serialize};
use serde::Deserialize as SerdeDeserialize;
use stratum_core::{Driver, DriverFactory, Error, Location, ScriptReader, VersionState};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::config::SledConfig;
use crate::error::SledStoreError;

const LOCK_KEY: &[u8] = b"lock";
const VERSION_KEY: &[u8] = b"version";

static NEXT_OWNER: AtomicU64 = AtomicU64::new(0);

/// Persisted migration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
struct StateRecord {
    version: i64,
    dirty: bool,
}

impl StateRecord {
    fn to_bytes(self) -> Result<Vec<u8>, SledStoreError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(&self)
            .map(|v| v.to_vec())
            .map_err(|e| SledStoreError::Encode(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, SledStoreError> {
        // Sled values carry no alignment guarantee.
        let mut aligned = rkyv::util::AlignedVec::<16>::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| SledStoreError::Decode(e.to_string()))
    }
}

/// One step of a sled migration script.
#[derive(Debug, Clone, PartialEq, Eq, SerdeDeserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Operation {
    Put {
        #[serde(default)]
        tree: Option<String>,
        key: String,
        value: String,
    },
    Remove {
        #[serde(default)]
        tree: Option<String>,
        key: String,
    },
    ClearTree {
        tree: String,
    },
    DropTree {
        tree: String,
    },
}

impl Operation {
    fn tree(&self) -> Option<&str> {
        match self {
            Operation::Put { tree, .. } | Operation::Remove { tree, .. } => tree.as_deref(),
            Operation::ClearTree { tree } | Operation::DropTree { tree } => Some(tree),
        }
    }
}

/// Driver over a sled database.
pub struct SledDriver {
    db: sled::Db,
    state: sled::Tree,
    config: SledConfig,
    owner: Vec<u8>,
}

impl SledDriver {
    /// Open the database and its state tree.
    ///
    /// A lock left behind by another process is cleared, since sled allows
    /// only one process to hold the database open.
    pub fn open(config: SledConfig) -> Result<Self, Error> {
        config.validate().map_err(|reason| Error::InvalidLocation {
            location: config.path.display().to_string(),
            reason,
        })?;

        let db = if config.temporary {
            sled::Config::new().temporary(true)
        } else {
            sled::Config::new().path(&config.path)
        }
        .open()
        .map_err(SledStoreError::from)?;
        Self::with_db(db, config)
    }

    /// Use an already opened database.
    pub fn with_db(db: sled::Db, config: SledConfig) -> Result<Self, Error> {
        let state = db
            .open_tree(&config.state_tree)
            .map_err(SledStoreError::from)?;

        let pid = std::process::id();
        let owner = format!("{pid}:{}", NEXT_OWNER.fetch_add(1, Ordering::Relaxed)).into_bytes();

        if let Some(holder) = state.get(LOCK_KEY).map_err(SledStoreError::from)? {
            let holder_pid = std::str::from_utf8(&holder)
                .ok()
                .and_then(|s| s.split(':').next())
                .and_then(|p| p.parse::<u32>().ok());
            if holder_pid != Some(pid) {
                warn!(holder = %String::from_utf8_lossy(&holder), "clearing stale migration lock");
                // Lost race means another driver in this process took it over.
                let _ = state
                    .compare_and_swap(LOCK_KEY, Some(&holder), None::<&[u8]>)
                    .map_err(SledStoreError::from)?;
            }
        }

        info!(path = %config.path.display(), tree = %config.state_tree, "opened sled store");
        Ok(Self {
            db,
            state,
            config,
            owner,
        })
    }

    /// The underlying database.
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn tree(&self, name: Option<&str>) -> Result<sled::Tree, SledStoreError> {
        match name {
            Some(name) => Ok(self.db.open_tree(name)?),
            None => Ok((*self.db).clone()),
        }
    }

    fn apply(&self, op: Operation) -> Result<(), SledStoreError> {
        match op {
            Operation::Put { tree, key, value } => {
                self.tree(tree.as_deref())?.insert(key, value.into_bytes())?;
            }
            Operation::Remove { tree, key } => {
                self.tree(tree.as_deref())?.remove(key)?;
            }
            Operation::ClearTree { tree } => {
                self.db.open_tree(tree)?.clear()?;
            }
            Operation::DropTree { tree } => {
                self.db.drop_tree(tree)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SledDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledDriver")
            .field("config", &self.config)
            .field("owner", &String::from_utf8_lossy(&self.owner))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Driver for SledDriver {
    async fn close(&mut self) -> Result<(), Error> {
        self.db.flush().map_err(SledStoreError::from)?;
        Ok(())
    }

    async fn lock(&self) -> Result<(), Error> {
        self.state
            .compare_and_swap(LOCK_KEY, None::<&[u8]>, Some(self.owner.as_slice()))
            .map_err(SledStoreError::from)?
            .map_err(|_| Error::AlreadyLocked)?;
        self.state.flush().map_err(SledStoreError::from)?;
        debug!("acquired migration lock");
        Ok(())
    }

    async fn unlock(&self) -> Result<(), Error> {
        self.state
            .compare_and_swap(LOCK_KEY, Some(self.owner.as_slice()), None::<&[u8]>)
            .map_err(SledStoreError::from)?
            .map_err(|_| Error::NotLocked)?;
        self.state.flush().map_err(SledStoreError::from)?;
        debug!("released migration lock");
        Ok(())
    }

    async fn run(&self, mut script: ScriptReader) -> Result<(), Error> {
        let mut body = String::new();
        script.read_to_string(&mut body).await?;

        let ops: Vec<Operation> = serde_json::from_str(&body)
            .map_err(|e| Error::database(SledStoreError::from(e), Some(&body)))?;
        if let Some(tree) = ops
            .iter()
            .filter_map(Operation::tree)
            .find(|tree| *tree == self.config.state_tree)
        {
            return Err(SledStoreError::ReservedTree(tree.to_string()).into());
        }

        let count = ops.len();
        for op in ops {
            self.apply(op)?;
        }
        self.db.flush().map_err(SledStoreError::from)?;
        debug!(operations = count, "applied sled script");
        Ok(())
    }

    async fn set_version(&self, version: i64, dirty: bool) -> Result<(), Error> {
        let state = VersionState::new(version, dirty);
        if state.needs_record() {
            let bytes = StateRecord { version, dirty }.to_bytes()?;
            self.state
                .insert(VERSION_KEY, bytes)
                .map_err(SledStoreError::from)?;
        } else {
            self.state
                .remove(VERSION_KEY)
                .map_err(SledStoreError::from)?;
        }
        self.state.flush().map_err(SledStoreError::from)?;
        debug!(%state, "recorded version");
        Ok(())
    }

    async fn version(&self) -> Result<VersionState, Error> {
        match self.state.get(VERSION_KEY).map_err(SledStoreError::from)? {
            Some(bytes) => {
                let record = StateRecord::from_bytes(&bytes)?;
                Ok(VersionState::new(record.version, record.dirty))
            }
            None => Ok(VersionState::NIL),
        }
    }

    async fn drop_all(&self) -> Result<(), Error> {
        let default_name = self.db.name();
        let mut dropped = 0usize;
        for name in self.db.tree_names() {
            if name == default_name || name.as_ref() == self.config.state_tree.as_bytes() {
                continue;
            }
            self.db.drop_tree(&name).map_err(SledStoreError::from)?;
            dropped += 1;
        }
        self.db.clear().map_err(SledStoreError::from)?;
        self.state
            .remove(VERSION_KEY)
            .map_err(SledStoreError::from)?;
        self.db.flush().map_err(SledStoreError::from)?;
        info!(trees = dropped, "dropped sled trees");
        Ok(())
    }
}

/// Opens [`SledDriver`]s for `sled://` locations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SledDriverFactory;

#[async_trait]
impl DriverFactory for SledDriverFactory {
    async fn open(&self, location: &Location) -> Result<Box<dyn Driver>, Error> {
        let config = SledConfig::from_location(location)?;
        Ok(Box::new(SledDriver::open(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use stratum_core::testing;
    use tempfile::TempDir;

    fn script(json: &str) -> ScriptReader {
        Box::new(Cursor::new(json.as_bytes().to_vec()))
    }

    #[test]
    fn test_state_record_bytes() {
        let record = StateRecord {
            version: 42,
            dirty: true,
        };
        let bytes = record.to_bytes().unwrap();
        // Offset by one so the input is misaligned.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        assert_eq!(StateRecord::from_bytes(&shifted[1..]).unwrap(), record);
    }

    #[tokio::test]
    async fn test_sled_conformance() {
        let driver = SledDriver::open(SledConfig::temporary()).unwrap();
        testing::exercise_driver(
            &driver,
            br#"[{"op": "put", "tree": "users", "key": "1", "value": "ada"}]"#,
        )
        .await;
        let names = driver.db().tree_names();
        assert!(!names.iter().any(|n| n.as_ref() == b"users"));
    }

    #[tokio::test]
    async fn test_script_operations() {
        let driver = SledDriver::open(SledConfig::temporary()).unwrap();
        driver
            .run(script(
                r#"[
                    {"op": "put", "tree": "users", "key": "1", "value": "ada"},
                    {"op": "put", "tree": "users", "key": "2", "value": "grace"},
                    {"op": "put", "key": "meta", "value": "v1"},
                    {"op": "remove", "tree": "users", "key": "2"}
                ]"#,
            ))
            .await
            .unwrap();

        let users = driver.db().open_tree("users").unwrap();
        assert_eq!(users.get("1").unwrap().as_deref(), Some(&b"ada"[..]));
        assert!(users.get("2").unwrap().is_none());
        assert_eq!(driver.db().get("meta").unwrap().as_deref(), Some(&b"v1"[..]));

        driver
            .run(script(r#"[{"op": "clear_tree", "tree": "users"}]"#))
            .await
            .unwrap();
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_script_applies_nothing() {
        let driver = SledDriver::open(SledConfig::temporary()).unwrap();
        let err = driver
            .run(script(
                r#"[{"op": "put", "key": "a", "value": "1"}, {"op": "explode"}]"#,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database { query: Some(_), .. }));
        assert!(driver.db().get("a").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_tree_is_reserved() {
        let driver = SledDriver::open(SledConfig::temporary()).unwrap();
        let err = driver
            .run(script(r#"[{"op": "drop_tree", "tree": "schema_migrations"}]"#))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database { .. }));
    }

    #[tokio::test]
    async fn test_lock_shared_between_drivers() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let a = SledDriver::with_db(db.clone(), SledConfig::temporary()).unwrap();
        let b = SledDriver::with_db(db, SledConfig::temporary()).unwrap();

        a.lock().await.unwrap();
        assert!(matches!(b.lock().await, Err(Error::AlreadyLocked)));
        assert!(matches!(b.unlock().await, Err(Error::NotLocked)));
        a.unlock().await.unwrap();
        b.lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_cleared_on_open() {
        let dir = TempDir::new().unwrap();
        let config = SledConfig::new(dir.path().join("db"));
        {
            let driver = SledDriver::open(config.clone()).unwrap();
            driver
                .state
                .insert(LOCK_KEY, b"0:99".to_vec())
                .unwrap();
            driver.state.flush().unwrap();
        }

        let driver = SledDriver::open(config).unwrap();
        driver.lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = SledConfig::new(dir.path().join("db")).with_state_tree("versions");
        {
            let mut driver = SledDriver::open(config.clone()).unwrap();
            driver.set_version(3, true).await.unwrap();
            driver.close().await.unwrap();
        }

        let driver = SledDriver::open(config).unwrap();
        assert_eq!(driver.version().await.unwrap(), VersionState::new(3, true));
    }
}
