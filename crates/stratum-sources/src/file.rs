//! Migrations stored as files in a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use stratum_core::{
    Direction, Error, Location, MigrationIdentity, MigrationIndex, Script, Source, SourceFactory,
};
use tracing::{debug, info};

use crate::error::SourceError;

/// A directory of migration scripts.
///
/// The directory is listed once when opened; only regular files at the top
/// level are considered, and names that are not migrations are skipped.
#[derive(Debug)]
pub struct FileSource {
    root: PathBuf,
    index: MigrationIndex,
}

impl FileSource {
    /// List `root` and index every migration file in it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| SourceError::io(&root, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::io(&root, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SourceError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => debug!(?name, "skipping non-UTF-8 file name"),
            }
        }
        names.sort();

        let index = MigrationIndex::scan(&names)?;
        info!(
            path = %root.display(),
            files = names.len(),
            versions = index.len(),
            "opened migration directory"
        );
        Ok(Self { root, index })
    }

    /// Serve a single migration file.
    ///
    /// Unlike [`FileSource::open`], the file name must be a valid migration key.
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SourceError::InvalidLocation(path.display().to_string()))?;
        let identity = MigrationIdentity::parse(name)?;

        tokio::fs::metadata(path)
            .await
            .map_err(|e| SourceError::io(path, e))?;

        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let index = MigrationIndex::from_identities([identity])?;
        Ok(Self { root, index })
    }

    /// The directory scripts are read from.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Source for FileSource {
    fn index(&self) -> &MigrationIndex {
        &self.index
    }

    async fn read(&self, version: u64, direction: Direction) -> Result<Script, Error> {
        let identity = self
            .index
            .get(version, direction)
            .ok_or(Error::MissingScript { version, direction })?;
        let path = self.root.join(identity.raw_key());
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| SourceError::io(&path, e))?;
        debug!(path = %path.display(), "reading migration");
        Ok(Script::new(
            Box::new(file),
            identity.label().map(str::to_string),
        ))
    }
}

/// Opens [`FileSource`]s for `file://` locations.
///
/// `file://migrations`, `file://./migrations` and `file:///abs/migrations` are
/// all accepted; an empty path means the working directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSourceFactory;

#[async_trait]
impl SourceFactory for FileSourceFactory {
    async fn open(&self, location: &Location) -> Result<Box<dyn Source>, Error> {
        let path = match location.details() {
            "" => ".",
            details => details,
        };
        Ok(Box::new(FileSource::open(path).await?))
    }
}
