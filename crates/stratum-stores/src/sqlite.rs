//! SQLite driver.
//!
//! Scripts are SQL batches executed inside one transaction. The migration
//! state lives in a single-row table, rewritten in one transaction on every
//! `set_version`. The lock is held per driver instance.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use stratum_core::{Driver, DriverFactory, Error, Location, ScriptReader, VersionState};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::config::SqliteConfig;
use crate::error::SqliteError;

/// Driver over one SQLite connection.
///
/// [`Driver::close`] closes the connection; later calls fail.
pub struct SqliteDriver {
    conn: Mutex<Option<Connection>>,
    config: SqliteConfig,
    locked: AtomicBool,
}

impl SqliteDriver {
    /// Open the database and make sure the migrations table exists.
    pub fn open(config: SqliteConfig) -> Result<Self, Error> {
        config.validate().map_err(|reason| Error::InvalidLocation {
            location: config.path.clone(),
            reason,
        })?;

        let conn = Connection::open(&config.path).map_err(SqliteError::from)?;
        conn.busy_timeout(config.busy_timeout)
            .map_err(SqliteError::from)?;

        let driver = Self {
            conn: Mutex::new(Some(conn)),
            config,
            locked: AtomicBool::new(false),
        };
        driver.ensure_version_table()?;
        info!(
            path = %driver.config.path,
            table = %driver.config.migrations_table,
            "opened sqlite store"
        );
        Ok(driver)
    }

    /// The configuration this driver was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Run `f` against the connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, Error> {
        Ok(f(&*self.connection()?).map_err(SqliteError::from)?)
    }

    fn connection(&self) -> Result<MappedMutexGuard<'_, Connection>, Error> {
        MutexGuard::try_map(self.conn.lock(), Option::as_mut)
            .map_err(|_| Error::database("connection is closed", None))
    }

    fn ensure_version_table(&self) -> Result<(), Error> {
        self.acquire()?;
        let created = self.create_version_table();
        self.release()?;
        created
    }

    fn create_version_table(&self) -> Result<(), Error> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (version INTEGER NOT NULL, dirty INTEGER NOT NULL)",
            self.config.migrations_table
        );
        self.connection()?
            .execute_batch(&sql)
            .map_err(SqliteError::from)?;
        Ok(())
    }

    fn acquire(&self) -> Result<(), Error> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::AlreadyLocked)
    }

    fn release(&self) -> Result<(), Error> {
        self.locked
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::NotLocked)
    }
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("config", &self.config)
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn close(&mut self) -> Result<(), Error> {
        if let Some(conn) = self.conn.get_mut().take() {
            conn.close().map_err(|(_, e)| SqliteError::from(e))?;
            debug!(path = %self.config.path, "closed sqlite store");
        }
        Ok(())
    }

    async fn lock(&self) -> Result<(), Error> {
        self.acquire()?;
        debug!("acquired migration lock");
        Ok(())
    }

    async fn unlock(&self) -> Result<(), Error> {
        self.release()?;
        debug!("released migration lock");
        Ok(())
    }

    async fn run(&self, mut script: ScriptReader) -> Result<(), Error> {
        let mut body = String::new();
        script.read_to_string(&mut body).await?;

        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(SqliteError::from)?;
        if let Err(source) = tx.execute_batch(&body) {
            return Err(SqliteError::Script {
                source,
                query: body,
            }
            .into());
        }
        tx.commit().map_err(SqliteError::from)?;
        debug!(bytes = body.len(), "executed sql script");
        Ok(())
    }

    async fn set_version(&self, version: i64, dirty: bool) -> Result<(), Error> {
        let state = VersionState::new(version, dirty);
        let table = &self.config.migrations_table;

        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(SqliteError::from)?;
        tx.execute(&format!("DELETE FROM \"{table}\""), [])
            .map_err(SqliteError::from)?;
        if state.needs_record() {
            tx.execute(
                &format!("INSERT INTO \"{table}\" (version, dirty) VALUES (?1, ?2)"),
                params![version, dirty],
            )
            .map_err(SqliteError::from)?;
        }
        tx.commit().map_err(SqliteError::from)?;
        debug!(%state, "recorded version");
        Ok(())
    }

    async fn version(&self) -> Result<VersionState, Error> {
        let sql = format!(
            "SELECT version, dirty FROM \"{}\" LIMIT 1",
            self.config.migrations_table
        );
        let row = self
            .connection()?
            .query_row(&sql, [], |row| Ok(VersionState::new(row.get(0)?, row.get(1)?)))
            .optional()
            .map_err(SqliteError::from)?;
        Ok(row.unwrap_or(VersionState::NIL))
    }

    async fn drop_all(&self) -> Result<(), Error> {
        {
            let mut conn = self.connection()?;
            let tables: Vec<String> = {
                let mut stmt = conn
                    .prepare(
                        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                    )
                    .map_err(SqliteError::from)?;
                let names = stmt
                    .query_map([], |row| row.get(0))
                    .map_err(SqliteError::from)?;
                names
                    .collect::<rusqlite::Result<_>>()
                    .map_err(SqliteError::from)?
            };

            let tx = conn.transaction().map_err(SqliteError::from)?;
            for table in &tables {
                tx.execute_batch(&format!(
                    "DROP TABLE IF EXISTS \"{}\"",
                    table.replace('"', "\"\"")
                ))
                .map_err(SqliteError::from)?;
            }
            tx.commit().map_err(SqliteError::from)?;
            info!(tables = tables.len(), "dropped sqlite tables");
        }
        self.create_version_table()
    }
}

/// Opens [`SqliteDriver`]s for `sqlite://` locations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriverFactory;

#[async_trait]
impl DriverFactory for SqliteDriverFactory {
    async fn open(&self, location: &Location) -> Result<Box<dyn Driver>, Error> {
        let config = SqliteConfig::from_location(location)?;
        Ok(Box::new(SqliteDriver::open(config)?))
    }
}
