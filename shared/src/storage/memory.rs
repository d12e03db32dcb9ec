use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::StorageError;
use crate::storage::{validate_key, BlobStore};

/// In-process bucket. Backs `--dryRun` and the test suites.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,

    /// Every successful write, in order.
    write_log: Mutex<Vec<String>>,

    /// Number of upcoming writes that will fail with a transport error.
    failing_writes: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert<K: Into<String>>(&self, key: K, bytes: Vec<u8>) {
        self.objects.lock().await.insert(key.into(), bytes);
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn written_keys(&self) -> Vec<String> {
        self.write_log.lock().await.clone()
    }

    /// Makes the next `count` writes fail, to simulate a flaky network.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(key).await.ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.keys().await)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;

        if self.take_injected_failure() {
            return Err(StorageError::Transport(format!(
                "injected failure while writing {key}"
            )));
        }

        self.objects.lock().await.insert(key.to_string(), bytes);
        self.write_log.lock().await.push(key.to_string());

        Ok(())
    }
}
