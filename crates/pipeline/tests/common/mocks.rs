use async_trait::async_trait;
use bytes::Bytes;
use ferry_storage::error::StorageResult;
use ferry_storage::{MemoryBackend, ObjectStore, StorageError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory-backed store that can be told to misbehave.
#[allow(dead_code)]
#[derive(Default)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    /// Remaining `put` calls that fail with an I/O error.
    pub failing_puts: AtomicUsize,
    /// Remaining `exists` calls on stored keys that report false anyway.
    pub missing_checks: AtomicUsize,
    /// Remaining `exists` calls that fail with an I/O error.
    pub failing_checks: AtomicUsize,
    /// Keys containing this fragment never exist.
    pub hidden: Mutex<Option<String>>,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub exists_checks: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_puts(self, n: usize) -> Self {
        self.failing_puts.store(n, Ordering::SeqCst);
        self
    }

    pub fn report_missing(self, n: usize) -> Self {
        self.missing_checks.store(n, Ordering::SeqCst);
        self
    }

    pub fn fail_checks(self, n: usize) -> Self {
        self.failing_checks.store(n, Ordering::SeqCst);
        self
    }

    pub fn hide(self, fragment: &str) -> Self {
        *self.hidden.lock().unwrap() = Some(fragment.to_string());
        self
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn exists_checks(&self) -> usize {
        self.exists_checks.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ObjectStore for FlakyBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.exists_checks.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_checks) {
            return Err(StorageError::Io(std::io::Error::other("backend unavailable")));
        }
        let stored = self.inner.exists(key).await?;
        if stored && take_one(&self.missing_checks) {
            return Ok(false);
        }
        let hidden = self.hidden.lock().unwrap().clone();
        if hidden.is_some_and(|fragment| key.contains(&fragment)) {
            return Ok(false);
        }
        Ok(stored)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_puts) {
            return Err(StorageError::Io(std::io::Error::other("write rejected")));
        }
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    fn is_external(&self) -> bool {
        false
    }
}
