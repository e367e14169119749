//! Source adapter errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while listing or reading migration scripts.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Filesystem access failed.
    #[error("cannot access {}: {source}", path.display())]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The object store rejected a request.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// A listed resource could not be loaded from its bundle.
    #[error("resource {0:?} is listed but its loader returned nothing")]
    MissingResource(String),

    /// The source location cannot be served.
    #[error("invalid source location: {0}")]
    InvalidLocation(String),
}

impl SourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<SourceError> for stratum_core::Error {
    fn from(err: SourceError) -> Self {
        stratum_core::Error::Source(err.to_string())
    }
}
