//! Scheme-keyed registry of driver and source factories.
//!
//! Adapter crates register their factories once at startup; locations are
//! then resolved by their scheme.

use crate::driver::{Driver, DriverFactory};
use crate::error::Error;
use crate::location::Location;
use crate::source::{Source, SourceFactory};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps location schemes to the factories that open them.
#[derive(Default, Clone)]
pub struct Registry {
    drivers: BTreeMap<String, Arc<dyn DriverFactory>>,
    sources: BTreeMap<String, Arc<dyn SourceFactory>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver factory for `scheme`.
    pub fn register_driver(
        &mut self,
        scheme: &str,
        factory: impl DriverFactory + 'static,
    ) -> Result<(), Error> {
        let scheme = scheme.to_ascii_lowercase();
        if self.drivers.contains_key(&scheme) {
            return Err(Error::DuplicateScheme {
                kind: "driver",
                scheme,
            });
        }
        self.drivers.insert(scheme, Arc::new(factory));
        Ok(())
    }

    /// Register a source factory for `scheme`.
    pub fn register_source(
        &mut self,
        scheme: &str,
        factory: impl SourceFactory + 'static,
    ) -> Result<(), Error> {
        let scheme = scheme.to_ascii_lowercase();
        if self.sources.contains_key(&scheme) {
            return Err(Error::DuplicateScheme {
                kind: "source",
                scheme,
            });
        }
        self.sources.insert(scheme, Arc::new(factory));
        Ok(())
    }

    /// Open the driver registered for the location's scheme.
    pub async fn open_driver(&self, location: &str) -> Result<Box<dyn Driver>, Error> {
        let location = Location::parse(location)?;
        let factory = self
            .drivers
            .get(location.scheme())
            .ok_or_else(|| Error::UnknownScheme {
                kind: "driver",
                scheme: location.scheme().to_string(),
            })?;
        tracing::debug!(scheme = location.scheme(), "opening driver");
        factory.open(&location).await
    }

    /// Open the source registered for the location's scheme.
    pub async fn open_source(&self, location: &str) -> Result<Box<dyn Source>, Error> {
        let location = Location::parse(location)?;
        let factory = self
            .sources
            .get(location.scheme())
            .ok_or_else(|| Error::UnknownScheme {
                kind: "source",
                scheme: location.scheme().to_string(),
            })?;
        tracing::debug!(scheme = location.scheme(), "opening source");
        factory.open(&location).await
    }

    /// Registered driver schemes, sorted.
    pub fn driver_schemes(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    /// Registered source schemes, sorted.
    pub fn source_schemes(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("drivers", &self.driver_schemes())
            .field("sources", &self.source_schemes())
            .finish()
    }
}
