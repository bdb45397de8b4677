use async_trait::async_trait;
use bytes::Bytes;
use ferry_storage::error::StorageResult;
use ferry_storage::{MemoryBackend, ObjectStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory-backed store that counts calls per operation.
#[allow(dead_code)]
#[derive(Default)]
pub struct InstrumentedBackend {
    pub inner: MemoryBackend,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub exists_checks: AtomicUsize,
}

#[allow(dead_code)]
impl InstrumentedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InstrumentedBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.exists_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }

    fn is_external(&self) -> bool {
        false
    }
}
