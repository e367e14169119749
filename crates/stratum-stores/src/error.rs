//! Store driver errors.

use thiserror::Error;

/// Errors raised by the SQLite driver.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// A statement issued by the driver itself failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A migration script failed; its transaction was rolled back.
    #[error("migration script failed: {source}")]
    Script {
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
        /// The script text.
        query: String,
    },
}

impl From<SqliteError> for stratum_core::Error {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Script { source, query } => {
                stratum_core::Error::database(source, Some(&query))
            }
            other => stratum_core::Error::database(other, None),
        }
    }
}

/// Errors raised by the sled driver.
#[derive(Debug, Error)]
pub enum SledStoreError {
    /// Sled rejected an operation.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// A migration script is not a valid operation list.
    #[error("invalid migration script: {0}")]
    Script(#[from] serde_json::Error),

    /// A migration script tried to touch the tree holding migration state.
    #[error("tree {0:?} holds migration state and cannot be modified by scripts")]
    ReservedTree(String),

    /// The state record could not be encoded.
    #[error("failed to encode migration state: {0}")]
    Encode(String),

    /// The state record could not be decoded.
    #[error("corrupt migration state: {0}")]
    Decode(String),
}

impl From<SledStoreError> for stratum_core::Error {
    fn from(err: SledStoreError) -> Self {
        stratum_core::Error::database(err, None)
    }
}
