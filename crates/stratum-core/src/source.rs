//! Source provider contract.
//!
//! A source enumerates migration scripts from some origin (a directory, an
//! object-store prefix, an embedded bundle) and hands out their bytes. The
//! enumeration is captured once, at open time, in a [`MigrationIndex`].

use crate::driver::ScriptReader;
use crate::error::Error;
use crate::location::Location;
use crate::migration::{Direction, MigrationIndex};
use async_trait::async_trait;

/// Content of one migration script together with its label.
pub struct Script {
    /// The script body.
    pub body: ScriptReader,
    /// Human label from the script key, if any.
    pub label: Option<String>,
}

impl Script {
    /// Wrap a body and label.
    pub fn new(body: ScriptReader, label: Option<String>) -> Self {
        Self { body, label }
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A snapshot of migration scripts.
#[async_trait]
pub trait Source: Send + Sync {
    /// The index captured when the source was opened.
    fn index(&self) -> &MigrationIndex;

    /// Read the bytes of the migration at `(version, direction)`.
    ///
    /// Implementations fail with [`Error::MissingScript`] when the index has
    /// no such entry.
    async fn read(&self, version: u64, direction: Direction) -> Result<Script, Error>;

    /// Release any resources held by the source.
    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Smallest version with an up migration.
    fn first(&self) -> Option<u64> {
        self.index().first()
    }

    /// Largest version below `version` with a down migration.
    fn prev(&self, version: u64) -> Option<u64> {
        self.index().prev(version)
    }

    /// Smallest version above `version` with an up migration.
    fn next(&self, version: u64) -> Option<u64> {
        self.index().next(version)
    }

    /// Read the up migration for `version`.
    async fn read_up(&self, version: u64) -> Result<Script, Error> {
        self.read(version, Direction::Up).await
    }

    /// Read the down migration for `version`.
    async fn read_down(&self, version: u64) -> Result<Script, Error> {
        self.read(version, Direction::Down).await
    }
}

/// Opens sources for one location scheme.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Open a source for `location`.
    async fn open(&self, location: &Location) -> Result<Box<dyn Source>, Error>;
}
