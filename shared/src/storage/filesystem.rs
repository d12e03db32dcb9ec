use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::errors::StorageError;
use crate::storage::{validate_key, BlobStore};

/// A bucket backed by a local directory. Keys map to relative paths under `root`.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let root = self.root.clone();

        tokio::task::spawn_blocking(move || list_relative_file_paths(&root))
            .await
            .map_err(|error| StorageError::Io(std::io::Error::new(ErrorKind::Other, error)))?
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await? && path.is_file())
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.object_path(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename, so readers never observe a partial object.
        let mut temporary_path = path.clone().into_os_string();
        temporary_path.push(".partial");

        tokio::fs::write(&temporary_path, bytes).await?;
        tokio::fs::rename(&temporary_path, &path).await?;

        Ok(())
    }
}

fn list_relative_file_paths(root: &Path) -> Result<Vec<String>, StorageError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|error| {
            StorageError::Io(
                error
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "walkdir loop")),
            )
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(root)
            .map_err(|error| StorageError::Parse(error.to_string()))?;

        let key = relative_path
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if !key.ends_with(".partial") {
            keys.push(key);
        }
    }

    keys.sort();
    Ok(keys)
}
