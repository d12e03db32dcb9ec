//! Remote blob storage: the source bucket work items are read from and the
//! destination bucket artifacts are delivered to.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use miette::{miette, Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::storage::filesystem::FilesystemBlobStore;
use crate::storage::s3::S3BlobStore;

pub mod filesystem;
pub mod memory;
pub mod s3;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Human-readable location of this store, for logging.
    fn describe(&self) -> String;

    /// Returns `StorageError::NotFound` if there is no object under `key`.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// All keys in the store, following pagination to the end.
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Publicly readable, idempotent write: an existing object under `key` is overwritten.
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;
}


#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Filesystem {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        /// S3-compatible gateway; AWS itself when absent.
        #[serde(default)]
        endpoint: Option<String>,
        access_key_id: String,
        secret_access_key: String,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl StorageConfig {
    pub fn open(&self) -> Result<Arc<dyn BlobStore>> {
        match self {
            StorageConfig::Filesystem { root } => {
                Ok(Arc::new(FilesystemBlobStore::new(root.clone())))
            }
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
            } => {
                let store = S3BlobStore::new(
                    bucket,
                    region,
                    endpoint.as_deref(),
                    access_key_id,
                    secret_access_key,
                )
                .wrap_err_with(|| miette!("Could not initialize S3 store for {bucket}."))?;

                Ok(Arc::new(store))
            }
        }
    }
}


/// Rejects keys that could escape a store's namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let is_invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "..");

    if is_invalid {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
        })
    } else {
        Ok(())
    }
}
