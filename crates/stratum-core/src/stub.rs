//! In-memory driver and source.
//!
//! Used by the engine tests and handy for exercising tooling without a real
//! backend. A [`MemoryStore`] plays the role of the database: every
//! [`MemoryDriver`] opened on it shares its state and its lock, the same way
//! two connections to one server would.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use crate::driver::{Driver, DriverFactory, ScriptReader, VersionState};
use crate::error::Error;
use crate::location::Location;
use crate::migration::{Direction, MigrationIndex};
use crate::source::{Script, Source, SourceFactory};

#[derive(Debug, Default)]
struct StoreState {
    record: Option<VersionState>,
    locked: bool,
    executed: Vec<String>,
    history: Vec<VersionState>,
    fail_marker: Option<String>,
}

/// Shared backing state for memory drivers.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a driver on this store.
    pub fn driver(&self) -> MemoryDriver {
        MemoryDriver {
            store: self.clone(),
        }
    }

    /// Bodies of every script executed successfully, in order.
    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().executed.clone()
    }

    /// Every state written through `set_version`, in order.
    pub fn history(&self) -> Vec<VersionState> {
        self.inner.lock().history.clone()
    }

    /// The raw state record; `None` when no record exists.
    pub fn record(&self) -> Option<VersionState> {
        self.inner.lock().record
    }

    /// Overwrite the raw state record.
    pub fn set_record(&self, record: Option<VersionState>) {
        self.inner.lock().record = record;
    }

    /// Whether some driver currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.lock().locked
    }

    /// Make every script whose body contains `marker` fail.
    pub fn fail_scripts_containing(&self, marker: impl Into<String>) {
        self.inner.lock().fail_marker = Some(marker.into());
    }
}

/// Driver over a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    store: MemoryStore,
}

impl MemoryDriver {
    /// A driver on a fresh store.
    pub fn new() -> Self {
        MemoryStore::new().driver()
    }

    /// The store this driver writes to.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn lock(&self) -> Result<(), Error> {
        let mut state = self.store.inner.lock();
        if state.locked {
            return Err(Error::AlreadyLocked);
        }
        state.locked = true;
        Ok(())
    }

    async fn unlock(&self) -> Result<(), Error> {
        let mut state = self.store.inner.lock();
        if !state.locked {
            return Err(Error::NotLocked);
        }
        state.locked = false;
        Ok(())
    }

    async fn run(&self, mut script: ScriptReader) -> Result<(), Error> {
        let mut body = String::new();
        script.read_to_string(&mut body).await?;

        let mut state = self.store.inner.lock();
        if let Some(marker) = &state.fail_marker {
            if body.contains(marker.as_str()) {
                return Err(Error::database("script rejected by store", Some(&body)));
            }
        }
        state.executed.push(body);
        Ok(())
    }

    async fn set_version(&self, version: i64, dirty: bool) -> Result<(), Error> {
        let value = VersionState::new(version, dirty);
        let mut state = self.store.inner.lock();
        state.record = value.needs_record().then_some(value);
        state.history.push(value);
        Ok(())
    }

    async fn version(&self) -> Result<VersionState, Error> {
        Ok(self.store.inner.lock().record.unwrap_or(VersionState::NIL))
    }

    async fn drop_all(&self) -> Result<(), Error> {
        let mut state = self.store.inner.lock();
        state.executed.clear();
        state.record = None;
        Ok(())
    }
}

/// Opens memory drivers; locations with the same details share one store.
#[derive(Debug, Default)]
pub struct MemoryDriverFactory {
    stores: Mutex<HashMap<String, MemoryStore>>,
}

#[async_trait]
impl DriverFactory for MemoryDriverFactory {
    async fn open(&self, location: &Location) -> Result<Box<dyn Driver>, Error> {
        let store = self
            .stores
            .lock()
            .entry(location.details().to_string())
            .or_default()
            .clone();
        Ok(Box::new(store.driver()))
    }
}

/// Source over scripts held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    index: MigrationIndex,
    contents: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    /// Build a source from `(key, body)` pairs. Keys that are not migrations are ignored.
    pub fn new<K, V>(scripts: impl IntoIterator<Item = (K, V)>) -> Result<Self, Error>
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let contents: HashMap<String, Vec<u8>> = scripts
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut keys: Vec<&String> = contents.keys().collect();
        keys.sort();
        let index = MigrationIndex::scan(keys)?;
        Ok(Self { index, contents })
    }
}

#[async_trait]
impl Source for MemorySource {
    fn index(&self) -> &MigrationIndex {
        &self.index
    }

    async fn read(&self, version: u64, direction: Direction) -> Result<Script, Error> {
        let identity = self
            .index
            .get(version, direction)
            .ok_or(Error::MissingScript { version, direction })?;
        let body = self
            .contents
            .get(identity.raw_key())
            .cloned()
            .ok_or(Error::MissingScript { version, direction })?;
        Ok(Script::new(
            Box::new(Cursor::new(body)),
            identity.label().map(str::to_string),
        ))
    }
}

/// Opens a [`MemorySource`] with a fixed script set for any location.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceFactory {
    scripts: Vec<(String, Vec<u8>)>,
}

impl MemorySourceFactory {
    /// Serve `scripts` from every opened source.
    pub fn new<K, V>(scripts: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        Self {
            scripts: scripts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl SourceFactory for MemorySourceFactory {
    async fn open(&self, _location: &Location) -> Result<Box<dyn Source>, Error> {
        Ok(Box::new(MemorySource::new(self.scripts.clone())?))
    }
}
