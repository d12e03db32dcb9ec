use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::debug;

use crate::capture::CaptureResult;

/// Stills saved per item (one every fourth rotation step).
pub const STILLS_PER_ITEM: usize = 8;

pub fn still_key(item_id: &str, still_index: usize) -> String {
    format!("{item_id}/screenshot-{still_index}.png")
}

pub fn animation_key(item_id: &str) -> String {
    format!("{item_id}/preview.gif")
}

/// Item IDs end up in file names and storage keys.
pub fn is_valid_item_id(item_id: &str) -> bool {
    !item_id.is_empty()
        && item_id != "."
        && item_id != ".."
        && !item_id.contains(|character: char| character == '/' || character == '\\')
}

/// Every `(local path, remote key)` pair that has to be uploaded for a captured item.
pub fn artifact_uploads(result: &CaptureResult) -> Vec<(PathBuf, String)> {
    let mut uploads: Vec<(PathBuf, String)> = result
        .still_paths
        .iter()
        .enumerate()
        .map(|(still_index, path)| (path.clone(), still_key(&result.item_id, still_index)))
        .collect();

    uploads.push((
        result.animation_path.clone(),
        animation_key(&result.item_id),
    ));

    uploads
}


/// Scratch directory holding stills and animations until they are delivered.
///
/// Every capture attempt gets its own file names, so a failed or repeated capture of an
/// item never touches files an earlier, still undelivered attempt is waiting to upload.
#[derive(Clone, Debug)]
pub struct StagingArea {
    directory: PathBuf,
    attempts: Arc<AtomicUsize>,
}

impl StagingArea {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Removes leftovers from a previous run and creates an empty directory.
    pub async fn recreate(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.directory).await {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }

        tokio::fs::create_dir_all(&self.directory).await
    }

    pub fn begin_attempt(&self, item_id: &str) -> StagedAttempt {
        StagedAttempt {
            directory: self.directory.clone(),
            item_id: item_id.to_string(),
            number: self.attempts.fetch_add(1, Ordering::SeqCst),
        }
    }
}


/// File names reserved for one capture attempt of one item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedAttempt {
    directory: PathBuf,
    item_id: String,
    number: usize,
}

impl StagedAttempt {
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn still_path(&self, still_index: usize) -> PathBuf {
        self.directory.join(format!(
            "{}-{}-{still_index}.png",
            self.item_id, self.number
        ))
    }

    pub fn animation_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}-{}.gif", self.item_id, self.number))
    }

    /// Best-effort removal of everything this attempt staged.
    pub async fn discard(&self) {
        let paths = (0..STILLS_PER_ITEM)
            .map(|still_index| self.still_path(still_index))
            .chain(std::iter::once(self.animation_path()));

        let removals = paths.map(|path| async move {
            if let Err(error) = tokio::fs::remove_file(&path).await {
                if error.kind() != ErrorKind::NotFound {
                    debug!(path = ?path, error = ?error, "Could not remove staged artifact.");
                }
            }
        });

        join_all(removals).await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_paths_follow_naming_scheme() {
        let staging = StagingArea::new("screenshots");
        let attempt = staging.begin_attempt("abc");

        assert_eq!(still_key("abc", 3), "abc/screenshot-3.png");
        assert_eq!(animation_key("abc"), "abc/preview.gif");
        assert_eq!(attempt.still_path(3), PathBuf::from("screenshots/abc-0-3.png"));
        assert_eq!(attempt.animation_path(), PathBuf::from("screenshots/abc-0.gif"));
    }

    #[test]
    fn attempts_never_share_file_names() {
        let staging = StagingArea::new("screenshots");

        let first = staging.begin_attempt("abc");
        let second = staging.clone().begin_attempt("abc");

        assert_ne!(first.number(), second.number());
        assert_ne!(first.animation_path(), second.animation_path());
        assert_ne!(first.still_path(0), second.still_path(0));
    }

    #[test]
    fn lists_nine_uploads_per_item() {
        let attempt = StagingArea::new("screenshots").begin_attempt("abc");
        let result = CaptureResult {
            item_id: "abc".to_string(),
            still_paths: (0..STILLS_PER_ITEM)
                .map(|still_index| attempt.still_path(still_index))
                .collect(),
            animation_path: attempt.animation_path(),
        };

        let uploads = artifact_uploads(&result);

        assert_eq!(uploads.len(), 9);
        assert_eq!(uploads[0].1, "abc/screenshot-0.png");
        assert_eq!(uploads[7].1, "abc/screenshot-7.png");
        assert_eq!(
            uploads[8],
            (PathBuf::from("screenshots/abc-0.gif"), "abc/preview.gif".to_string())
        );
    }

    #[test]
    fn rejects_path_like_item_ids() {
        assert!(is_valid_item_id("8f1c2d3e-aaaa"));
        for invalid in ["", ".", "..", "a/b", "a\\b"] {
            assert!(!is_valid_item_id(invalid));
        }
    }

    #[tokio::test]
    async fn recreate_clears_previous_run() {
        let directory = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(directory.path().join("screenshots"));

        staging.recreate().await.unwrap();
        let leftover = staging.begin_attempt("old").animation_path();
        tokio::fs::write(&leftover, b"gif").await.unwrap();
        staging.recreate().await.unwrap();

        assert!(staging.directory().is_dir());
        assert!(!leftover.exists());
    }

    #[tokio::test]
    async fn discarding_an_attempt_keeps_other_attempts() {
        let directory = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(directory.path());
        let earlier = staging.begin_attempt("a");
        let later = staging.begin_attempt("a");

        for attempt in [&earlier, &later] {
            tokio::fs::write(attempt.still_path(0), b"png").await.unwrap();
            tokio::fs::write(attempt.animation_path(), b"gif").await.unwrap();
        }

        later.discard().await;

        assert!(!later.still_path(0).exists());
        assert!(!later.animation_path().exists());
        assert!(earlier.still_path(0).exists());
        assert!(earlier.animation_path().exists());
    }
}
