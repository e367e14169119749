//! Store driver contract.
//!
//! A driver adapts one storage technology: it executes script bodies, owns the
//! persisted `(version, dirty)` pair and the store-wide lock. The engine never
//! touches the store except through this trait.

use crate::error::Error;
use crate::location::Location;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Version recorded when no migration has been applied.
pub const NIL_VERSION: i64 = -1;

/// Byte stream of one migration script.
pub type ScriptReader = Box<dyn AsyncRead + Send + Unpin>;

/// The persisted migration state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionState {
    /// Last recorded version, or [`NIL_VERSION`].
    pub version: i64,
    /// Whether the script for `version` may not have finished.
    pub dirty: bool,
}

impl VersionState {
    /// State of a store no migration has touched.
    pub const NIL: Self = Self {
        version: NIL_VERSION,
        dirty: false,
    };

    /// Create a state.
    pub fn new(version: i64, dirty: bool) -> Self {
        Self { version, dirty }
    }

    /// Clean state at `version`.
    pub fn clean(version: u64) -> Result<Self, Error> {
        Ok(Self::new(as_recorded(version)?, false))
    }

    /// Whether no version is recorded.
    pub fn is_nil(&self) -> bool {
        self.version == NIL_VERSION
    }

    /// The recorded version, if there is one.
    pub fn applied(&self) -> Option<u64> {
        u64::try_from(self.version).ok()
    }

    /// Whether a driver must persist a state record for this value.
    ///
    /// `(NIL_VERSION, false)` is represented by the absence of a record, but a
    /// dirty nil state must still be written: a failed down migration of the
    /// very first version would otherwise leave no trace of the dirty flag.
    pub fn needs_record(&self) -> bool {
        self.version >= 0 || (self.version == NIL_VERSION && self.dirty)
    }
}

impl Default for VersionState {
    fn default() -> Self {
        Self::NIL
    }
}

impl std::fmt::Display for VersionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_nil() {
            f.write_str("nil")?;
        } else {
            write!(f, "{}", self.version)?;
        }
        if self.dirty {
            f.write_str(" (dirty)")?;
        }
        Ok(())
    }
}

/// Largest version a store can record.
pub const MAX_VERSION: u64 = i64::MAX as u64;

/// Convert an index version into the signed representation stores persist.
pub fn as_recorded(version: u64) -> Result<i64, Error> {
    i64::try_from(version).map_err(|_| Error::VersionOutOfRange(version))
}

/// A connection to a backing store.
///
/// Every method except [`close`](Driver::close) takes `&self`; drivers use
/// interior mutability for connection state.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Release the underlying connection.
    async fn close(&mut self) -> Result<(), Error>;

    /// Take the store-wide lock. Fails with [`Error::AlreadyLocked`] when held.
    async fn lock(&self) -> Result<(), Error>;

    /// Release the lock. Fails with [`Error::NotLocked`] when not held.
    async fn unlock(&self) -> Result<(), Error>;

    /// Execute a script body against the store.
    async fn run(&self, script: ScriptReader) -> Result<(), Error>;

    /// Persist `(version, dirty)` atomically with respect to readers of the pair.
    async fn set_version(&self, version: i64, dirty: bool) -> Result<(), Error>;

    /// Read the persisted state; [`VersionState::NIL`] when nothing is recorded.
    async fn version(&self) -> Result<VersionState, Error>;

    /// Remove everything the store manages. Administrative reset only.
    async fn drop_all(&self) -> Result<(), Error>;
}

/// Opens drivers for one location scheme.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Open a driver for `location`.
    async fn open(&self, location: &Location) -> Result<Box<dyn Driver>, Error>;
}
