//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Object store abstraction for content-addressed upload storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Static identifier for the backend type (e.g., "s3", "filesystem").
    /// Used for logging.
    fn backend_name(&self) -> &'static str;

    /// Whether objects live behind a network hop.
    ///
    /// Remote stores are latency-bound, so the passes oversubscribe their
    /// worker pools when this returns true.
    fn is_external(&self) -> bool;

    /// Verify storage backend connectivity.
    ///
    /// Called once before a pass starts; a failure aborts the run.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
