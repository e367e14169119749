//! Migrations compiled into the binary.
//!
//! A bundle is a list of names plus a loader that returns the bytes for a
//! name. `include_bytes!` tables can be served directly with
//! [`ResourceSource::from_static`].

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use stratum_core::{Direction, Error, Location, MigrationIndex, Script, Source, SourceFactory};

use crate::error::SourceError;

type Loader = dyn Fn(&str) -> Option<Bytes> + Send + Sync;

/// An embedded bundle of migration scripts.
#[derive(Clone)]
pub struct ResourceSource {
    index: MigrationIndex,
    loader: Arc<Loader>,
}

impl ResourceSource {
    /// Index `names` and load bodies on demand with `loader`.
    pub fn new<I, S, F>(names: I, loader: F) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str) -> Option<Bytes> + Send + Sync + 'static,
    {
        Ok(Self {
            index: MigrationIndex::scan(names)?,
            loader: Arc::new(loader),
        })
    }

    /// Serve a static `(name, body)` table.
    pub fn from_static(entries: &'static [(&'static str, &'static [u8])]) -> Result<Self, Error> {
        Self::new(entries.iter().map(|(name, _)| *name), move |key| {
            entries
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, body)| Bytes::from_static(*body))
        })
    }
}

impl std::fmt::Debug for ResourceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSource")
            .field("versions", &self.index.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Source for ResourceSource {
    fn index(&self) -> &MigrationIndex {
        &self.index
    }

    async fn read(&self, version: u64, direction: Direction) -> Result<Script, Error> {
        let identity = self
            .index
            .get(version, direction)
            .ok_or(Error::MissingScript { version, direction })?;
        let body = (self.loader)(identity.raw_key())
            .ok_or_else(|| SourceError::MissingResource(identity.raw_key().to_string()))?;
        Ok(Script::new(
            Box::new(Cursor::new(body)),
            identity.label().map(str::to_string),
        ))
    }
}

/// Placeholder factory for the `embed` scheme.
///
/// Bundles live in the program, so there is nothing a location string could
/// point at; construct a [`ResourceSource`] and pass it to the migrator instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSourceFactory;

#[async_trait]
impl SourceFactory for ResourceSourceFactory {
    async fn open(&self, location: &Location) -> Result<Box<dyn Source>, Error> {
        Err(Error::Unsupported(format!(
            "{location}: embedded bundles cannot be opened by location"
        )))
    }
}
