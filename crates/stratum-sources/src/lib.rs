//! Stratum Sources - where migration scripts come from.
//!
//! | scheme | source |
//! |--------|--------|
//! | `file` | [`FileSource`], a local directory |
//! | `s3` | [`ObjectSource`] over Amazon S3 |
//! | `embed` | [`ResourceSource`], constructed in code only |
//!
//! [`ObjectSource`] accepts any `object_store` backend, so other object stores
//! can be served by constructing one directly.

pub mod error;
pub mod file;
pub mod object;
pub mod resource;

pub use error::SourceError;
pub use file::{FileSource, FileSourceFactory};
pub use object::{ObjectSource, S3SourceFactory};
pub use resource::{ResourceSource, ResourceSourceFactory};

use stratum_core::{Error, Registry};

/// Register every source scheme this crate provides.
pub fn register(registry: &mut Registry) -> Result<(), Error> {
    registry.register_source("file", FileSourceFactory)?;
    registry.register_source("s3", S3SourceFactory)?;
    registry.register_source("embed", ResourceSourceFactory)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_schemes() {
        let mut registry = Registry::new();
        register(&mut registry).unwrap();
        assert_eq!(registry.source_schemes(), vec!["embed", "file", "s3"]);
        assert!(matches!(
            register(&mut registry),
            Err(Error::DuplicateScheme { .. })
        ));
    }
}
