//! Core error types.

use crate::migration::Direction;
use thiserror::Error;

/// Errors surfaced by the index, the contracts, and the migration engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A script key does not follow the `<version>_<label>.<up|down>.<ext>` convention.
    #[error("malformed migration key {key:?}: {reason}")]
    MalformedIdentity {
        /// The offending key.
        key: String,
        /// Why parsing failed.
        reason: &'static str,
    },

    /// Two scripts claim the same version and direction.
    #[error("duplicate migration for version {version} ({direction}): {key:?}")]
    DuplicateMigration {
        /// Conflicting version.
        version: u64,
        /// Conflicting direction.
        direction: Direction,
        /// Key of the script that was rejected.
        key: String,
    },

    /// The store lock is already held.
    #[error("database is already locked")]
    AlreadyLocked,

    /// Unlock was requested without holding the lock.
    #[error("database is not locked")]
    NotLocked,

    /// A previous run left the store in an indeterminate state.
    #[error("database is dirty at version {version}; fix and force the version")]
    DirtyDatabase {
        /// Version recorded alongside the dirty flag.
        version: i64,
    },

    /// A script body failed while executing against the store.
    #[error("migration {version} ({direction}) failed after {completed} completed step(s): {source}")]
    Execution {
        /// Version of the script that failed.
        version: u64,
        /// Direction of the script that failed.
        direction: Direction,
        /// Steps of the same request that finished cleanly before the failure.
        completed: usize,
        /// The driver's own error.
        #[source]
        source: Box<Error>,
    },

    /// An explicit target version has no up migration in the index.
    #[error("no migration found for version {version}")]
    NotFound {
        /// The requested version.
        version: u64,
    },

    /// A version below the nil sentinel was requested.
    #[error("invalid version {0}: must be >= -1")]
    InvalidVersion(i64),

    /// A migration version too large for the signed store record.
    #[error("version {0} does not fit in a signed 64-bit store record")]
    VersionOutOfRange(u64),

    /// The index has no script for the step the engine must take next.
    #[error("no {direction} migration for version {version}")]
    MissingScript {
        /// Version that needs a script.
        version: u64,
        /// Direction of the missing script.
        direction: Direction,
    },

    /// A location string could not be parsed.
    #[error("invalid location {location:?}: {reason}")]
    InvalidLocation {
        /// The raw location string.
        location: String,
        /// Why parsing failed.
        reason: String,
    },

    /// No factory is registered for a location scheme.
    #[error("unknown {kind} scheme {scheme:?}")]
    UnknownScheme {
        /// Either "driver" or "source".
        kind: &'static str,
        /// The scheme that was looked up.
        scheme: String,
    },

    /// A factory was registered twice for the same scheme.
    #[error("{kind} scheme {scheme:?} is already registered")]
    DuplicateScheme {
        /// Either "driver" or "source".
        kind: &'static str,
        /// The scheme that was registered twice.
        scheme: String,
    },

    /// The adapter does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Backend failure outside of a migration script.
    #[error("database error: {message}{}", query_suffix(.query))]
    Database {
        /// Backend error text.
        message: String,
        /// The statement that failed, when there was one.
        query: Option<String>,
    },

    /// Failure reading migration content.
    #[error("source error: {0}")]
    Source(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn query_suffix(query: &Option<String>) -> String {
    match query {
        Some(q) => format!(" in query {q:?}"),
        None => String::new(),
    }
}

impl Error {
    /// Build a [`Error::Database`] from any backend error.
    pub fn database(err: impl std::fmt::Display, query: Option<&str>) -> Self {
        Error::Database {
            message: err.to_string(),
            query: query.map(str::to_string),
        }
    }

    /// Whether the store was found dirty.
    pub fn is_dirty(&self) -> bool {
        matches!(self, Error::DirtyDatabase { .. })
    }
}
