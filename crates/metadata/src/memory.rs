//! In-memory record stores.
//!
//! Behave like the SQLite stores but keep everything in process, so pass
//! logic can be exercised without a database.

use crate::error::MetadataResult;
use crate::models::MigrationSummary;
use crate::repos::{DownloadCacheRepo, MigrationRepo, SourceRepo};
use async_trait::async_trait;
use ferry_core::{DownloadCacheEntry, MigratedUpload, OptimizedImage, SourceUpload, UploadId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Source inventory built up by tests.
#[derive(Default)]
pub struct MemorySource {
    uploads: Mutex<BTreeMap<UploadId, SourceUpload>>,
    post_references: Mutex<HashSet<UploadId>>,
    avatars: Mutex<HashSet<UploadId>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, upload: SourceUpload) {
        lock(&self.uploads).insert(upload.id.clone(), upload);
    }

    pub fn reference_from_post(&self, id: impl Into<UploadId>) {
        lock(&self.post_references).insert(id.into());
    }

    pub fn use_as_avatar(&self, id: impl Into<UploadId>) {
        lock(&self.avatars).insert(id.into());
    }
}

#[async_trait]
impl SourceRepo for MemorySource {
    async fn upload_ids(&self) -> MetadataResult<HashSet<UploadId>> {
        Ok(lock(&self.uploads).keys().cloned().collect())
    }

    async fn get_uploads(&self, ids: &[UploadId]) -> MetadataResult<Vec<SourceUpload>> {
        let uploads = lock(&self.uploads);
        Ok(ids.iter().filter_map(|id| uploads.get(id).cloned()).collect())
    }

    async fn post_referenced_ids(&self) -> MetadataResult<HashSet<UploadId>> {
        Ok(lock(&self.post_references).clone())
    }

    async fn avatar_ids(&self) -> MetadataResult<HashSet<UploadId>> {
        Ok(lock(&self.avatars).clone())
    }
}

/// Bookkeeping store that also counts writes, so tests can assert on them.
#[derive(Default)]
pub struct MemoryMigrations {
    uploads: Mutex<BTreeMap<UploadId, MigratedUpload>>,
    optimized: Mutex<HashMap<UploadId, OptimizedImage>>,
    writes: Mutex<Vec<UploadId>>,
}

impl MemoryMigrations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers passed to `record_migration`, in call order.
    pub fn writes(&self) -> Vec<UploadId> {
        lock(&self.writes).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.uploads).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.uploads).is_empty()
    }
}

#[async_trait]
impl MigrationRepo for MemoryMigrations {
    async fn migrated_ids(&self) -> MetadataResult<HashSet<UploadId>> {
        Ok(lock(&self.uploads).keys().cloned().collect())
    }

    async fn get_migrated(&self, id: &UploadId) -> MetadataResult<Option<MigratedUpload>> {
        Ok(lock(&self.uploads).get(id).cloned())
    }

    async fn record_migration(&self, record: &MigratedUpload) -> MetadataResult<()> {
        lock(&self.writes).push(record.id.clone());
        lock(&self.uploads).insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_created(
        &self,
        after: Option<&UploadId>,
        limit: u32,
    ) -> MetadataResult<Vec<MigratedUpload>> {
        let uploads = lock(&self.uploads);
        Ok(uploads
            .values()
            .filter(|u| u.upload.is_some())
            .filter(|u| after.is_none_or(|after| &u.id > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_created(&self) -> MetadataResult<u64> {
        Ok(lock(&self.uploads)
            .values()
            .filter(|u| u.upload.is_some())
            .count() as u64)
    }

    async fn delete_migration(&self, id: &UploadId) -> MetadataResult<bool> {
        lock(&self.optimized).remove(id);
        Ok(lock(&self.uploads).remove(id).is_some())
    }

    async fn optimized_ids(&self) -> MetadataResult<HashSet<UploadId>> {
        Ok(lock(&self.optimized).keys().cloned().collect())
    }

    async fn get_optimized(&self, id: &UploadId) -> MetadataResult<Option<OptimizedImage>> {
        Ok(lock(&self.optimized).get(id).cloned())
    }

    async fn record_optimized(&self, image: &OptimizedImage) -> MetadataResult<bool> {
        let mut optimized = lock(&self.optimized);
        if optimized.contains_key(&image.upload_id) {
            return Ok(false);
        }
        optimized.insert(image.upload_id.clone(), image.clone());
        Ok(true)
    }

    async fn summary(&self) -> MetadataResult<MigrationSummary> {
        let mut summary = MigrationSummary {
            optimized: lock(&self.optimized).len() as u64,
            ..Default::default()
        };
        for upload in lock(&self.uploads).values() {
            summary.total += 1;
            match upload.skip_reason {
                None => summary.created += 1,
                Some(reason) => summary.count_skip(reason, 1),
            }
        }
        Ok(summary)
    }
}

#[derive(Default)]
pub struct MemoryDownloadCache {
    entries: Mutex<HashMap<UploadId, DownloadCacheEntry>>,
}

impl MemoryDownloadCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DownloadCacheRepo for MemoryDownloadCache {
    async fn get_download(&self, id: &UploadId) -> MetadataResult<Option<DownloadCacheEntry>> {
        Ok(lock(&self.entries).get(id).cloned())
    }

    async fn put_download(&self, entry: &DownloadCacheEntry) -> MetadataResult<()> {
        lock(&self.entries).insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn remove_download(&self, id: &UploadId) -> MetadataResult<()> {
        lock(&self.entries).remove(id);
        Ok(())
    }
}
