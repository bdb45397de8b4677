//! Download cache repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use ferry_core::{DownloadCacheEntry, UploadId};

/// Remembers remote files already fetched so interrupted runs resume
/// without downloading them again.
#[async_trait]
pub trait DownloadCacheRepo: Send + Sync {
    async fn get_download(&self, id: &UploadId) -> MetadataResult<Option<DownloadCacheEntry>>;

    async fn put_download(&self, entry: &DownloadCacheEntry) -> MetadataResult<()>;

    /// Forget an entry whose file has gone missing.
    async fn remove_download(&self, id: &UploadId) -> MetadataResult<()>;
}
