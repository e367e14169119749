//! Migrations stored under a prefix in an object store.
//!
//! The prefix is listed non-recursively with `/` as the delimiter. Each
//! object's final path segment is parsed as a migration key and read back by
//! joining the prefix and that key.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::ObjectStore;
use stratum_core::{Direction, Error, Location, MigrationIndex, Script, Source, SourceFactory};
use tracing::{debug, info};

use crate::error::SourceError;

/// Option naming the region of an `s3://` location.
pub const REGION_OPTION: &str = "x-region";

/// Option overriding the endpoint of an `s3://` location.
pub const ENDPOINT_OPTION: &str = "x-endpoint";

/// Migration scripts under one object-store prefix.
pub struct ObjectSource {
    store: Arc<dyn ObjectStore>,
    prefix: Option<Path>,
    index: MigrationIndex,
}

impl ObjectSource {
    /// List `prefix` in `store` and index the migrations found there.
    pub async fn open(store: Arc<dyn ObjectStore>, prefix: &str) -> Result<Self, Error> {
        let trimmed = prefix.trim_matches('/');
        let prefix = (!trimmed.is_empty()).then(|| Path::from(trimmed));

        let listing = store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(SourceError::from)?;

        let mut names: Vec<String> = listing
            .objects
            .iter()
            .filter_map(|meta| meta.location.filename().map(str::to_string))
            .collect();
        names.sort();

        let index = MigrationIndex::scan(&names)?;
        info!(
            prefix = trimmed,
            objects = names.len(),
            versions = index.len(),
            "opened object store prefix"
        );
        Ok(Self {
            store,
            prefix,
            index,
        })
    }

    /// The prefix scripts are listed under, if any.
    pub fn prefix(&self) -> Option<&Path> {
        self.prefix.as_ref()
    }

    fn object_path(&self, key: &str) -> Path {
        match &self.prefix {
            Some(prefix) => prefix.child(key),
            None => Path::from(key),
        }
    }
}

impl std::fmt::Debug for ObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectSource")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .field("versions", &self.index.len())
            .finish()
    }
}

#[async_trait]
impl Source for ObjectSource {
    fn index(&self) -> &MigrationIndex {
        &self.index
    }

    async fn read(&self, version: u64, direction: Direction) -> Result<Script, Error> {
        let identity = self
            .index
            .get(version, direction)
            .ok_or(Error::MissingScript { version, direction })?;
        let path = self.object_path(identity.raw_key());
        debug!(%path, "fetching migration object");

        let body = self
            .store
            .get(&path)
            .await
            .map_err(SourceError::from)?
            .bytes()
            .await
            .map_err(SourceError::from)?;
        Ok(Script::new(
            Box::new(Cursor::new(body)),
            identity.label().map(str::to_string),
        ))
    }
}

/// Opens [`ObjectSource`]s for `s3://bucket/prefix` locations.
///
/// Credentials come from the standard AWS environment variables. The
/// `x-region` and `x-endpoint` options override the region and endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3SourceFactory;

#[async_trait]
impl SourceFactory for S3SourceFactory {
    async fn open(&self, location: &Location) -> Result<Box<dyn Source>, Error> {
        let (bucket, prefix) = location.host_and_path();
        if bucket.is_empty() {
            return Err(Error::InvalidLocation {
                location: location.to_string(),
                reason: "missing bucket name".to_string(),
            });
        }

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = location.option(REGION_OPTION) {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = location.option(ENDPOINT_OPTION) {
            builder = builder.with_endpoint(endpoint);
        }
        let store = builder.build().map_err(SourceError::from)?;

        Ok(Box::new(ObjectSource::open(Arc::new(store), prefix).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::PutPayload;
    use stratum_core::testing;

    async fn seeded(prefix: &str) -> Arc<dyn ObjectStore> {
        let store = Arc::new(InMemory::new());
        for (name, body) in testing::SOURCE_FIXTURE {
            let path = if prefix.is_empty() {
                Path::from(*name)
            } else {
                Path::from(format!("{prefix}/{name}"))
            };
            store
                .put(&path, PutPayload::from(body.as_bytes().to_vec()))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_object_source_conformance() {
        let store = seeded("prod/migrations").await;
        let source = ObjectSource::open(store, "/prod/migrations/").await.unwrap();
        testing::exercise_source(&source).await;
    }

    #[tokio::test]
    async fn test_bucket_root() {
        let store = seeded("").await;
        let source = ObjectSource::open(store, "").await.unwrap();
        assert!(source.prefix().is_none());
        testing::exercise_source(&source).await;
    }

    #[tokio::test]
    async fn test_listing_is_not_recursive() {
        let store = seeded("prod").await;
        store
            .put(
                &Path::from("prod/archive/9_old.up.sql"),
                PutPayload::from(b"old".to_vec()),
            )
            .await
            .unwrap();

        let source = ObjectSource::open(store, "prod").await.unwrap();
        assert!(!source.index().has_up(9));
        assert_eq!(source.index().len(), 5);
    }

    #[tokio::test]
    async fn test_s3_location_requires_bucket() {
        let location = Location::parse("s3:///migrations").unwrap();
        let err = S3SourceFactory.open(&location).await.err().unwrap();
        assert!(matches!(err, Error::InvalidLocation { .. }));
    }
}
