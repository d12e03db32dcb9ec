//! Everything that happens to one item while the render host is looking at it:
//! waiting until the scene is ready, rotating the camera and producing artifacts.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::host::HostError;

pub mod animation;
pub mod readiness;
pub mod rotation;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadinessPhase {
    Initialization,
    Provisioning,
    AssetLoad,
}

impl Display for ReadinessPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessPhase::Initialization => write!(f, "the editor to initialize"),
            ReadinessPhase::Provisioning => write!(f, "the scene to provision"),
            ReadinessPhase::AssetLoad => write!(f, "assets to load"),
        }
    }
}

/// Reasons an item is skipped. None of these ever stop the batch.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("Could not fetch item: {0}")]
    Fetch(String),

    #[error("Scene is empty")]
    ContentEmpty,

    #[error("Timed out after {:.1} seconds waiting for {phase}", .waited.as_secs_f64())]
    HostTimeout {
        phase: ReadinessPhase,
        waited: Duration,
    },

    #[error("Capture aborted at step {step}: {source}")]
    CaptureAborted {
        step: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Render host failed: {0}")]
    Host(#[from] HostError),

    #[error("Staging area failed: {0}")]
    Staging(#[from] std::io::Error),
}

impl ItemError {
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::Fetch(_) => "FetchError",
            ItemError::ContentEmpty => "ContentEmptyError",
            ItemError::HostTimeout { .. } => "HostTimeoutError",
            ItemError::CaptureAborted { .. } => "CaptureAbortedError",
            ItemError::Host(_) => "HostError",
            ItemError::Staging(_) => "StagingError",
        }
    }

    pub fn capture_aborted<E>(step: usize, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ItemError::CaptureAborted {
            step,
            source: Box::new(source),
        }
    }
}


/// One screenshot of the rotation, in its native (PNG) encoding.
#[derive(Clone, Debug)]
pub struct Frame {
    pub step: usize,
    pub angle: f64,
    pub png: Vec<u8>,
}

/// Artifacts of a fully captured item. Only ever produced after all rotation steps succeeded.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureResult {
    pub item_id: String,
    pub still_paths: Vec<PathBuf>,
    pub animation_path: PathBuf,
}
