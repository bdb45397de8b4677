//! Bookkeeping repository.

use crate::error::MetadataResult;
use crate::models::MigrationSummary;
use async_trait::async_trait;
use ferry_core::{MigratedUpload, OptimizedImage, UploadId};
use std::collections::HashSet;

/// Read-write access to migration outcomes.
///
/// A pass mutates this store from a single task only; implementations do not
/// need to order concurrent writers.
#[async_trait]
pub trait MigrationRepo: Send + Sync {
    /// Identifiers with a bookkeeping row, whatever their outcome.
    async fn migrated_ids(&self) -> MetadataResult<HashSet<UploadId>>;

    async fn get_migrated(&self, id: &UploadId) -> MetadataResult<Option<MigratedUpload>>;

    /// Insert or replace the row for `record.id`.
    async fn record_migration(&self, record: &MigratedUpload) -> MetadataResult<()>;

    /// Rows with a stored object, ordered by identifier, strictly after
    /// `after`. Used for keyset pagination.
    async fn list_created(
        &self,
        after: Option<&UploadId>,
        limit: u32,
    ) -> MetadataResult<Vec<MigratedUpload>>;

    async fn count_created(&self) -> MetadataResult<u64>;

    /// Delete a bookkeeping row and its optimized images.
    /// Returns false if no row existed.
    async fn delete_migration(&self, id: &UploadId) -> MetadataResult<bool>;

    async fn optimized_ids(&self) -> MetadataResult<HashSet<UploadId>>;

    async fn get_optimized(&self, id: &UploadId) -> MetadataResult<Option<OptimizedImage>>;

    /// Record derivatives for an upload unless some already exist.
    /// Returns false if a record was already present.
    async fn record_optimized(&self, image: &OptimizedImage) -> MetadataResult<bool>;

    async fn summary(&self) -> MetadataResult<MigrationSummary>;
}
