//! Uploading captured artifacts to the destination store.

use std::path::PathBuf;

use futures_util::future::try_join_all;
use shared::errors::StorageError;
use shared::storage::BlobStore;
use thiserror::Error;
use tracing::debug;

use crate::capture::CaptureResult;
use crate::staging::artifact_uploads;

pub mod queue;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("could not read staged artifact {}", .path.display())]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not upload {key}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },
}


/// Uploads every still and the animation of `result`. Succeeds only if all of them made it;
/// objects that did make it are simply overwritten on the next attempt.
pub async fn deliver_item(
    destination: &dyn BlobStore,
    result: &CaptureResult,
) -> Result<(), TransferError> {
    let uploads = artifact_uploads(result)
        .into_iter()
        .map(|(path, key)| upload_artifact(destination, path, key));

    try_join_all(uploads).await?;
    Ok(())
}

async fn upload_artifact(
    destination: &dyn BlobStore,
    path: PathBuf,
    key: String,
) -> Result<(), TransferError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| TransferError::ReadArtifact {
            path: path.clone(),
            source,
        })?;

    let size = bytes.len();
    destination
        .write(&key, bytes)
        .await
        .map_err(|source| TransferError::Upload {
            key: key.clone(),
            source,
        })?;

    debug!(key, size, "Artifact uploaded.");
    Ok(())
}
