//! Source inventory repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use ferry_core::{SourceUpload, UploadId};
use std::collections::HashSet;

/// Read-only access to the legacy upload inventory.
#[async_trait]
pub trait SourceRepo: Send + Sync {
    /// Identifiers of every upload in the inventory.
    async fn upload_ids(&self) -> MetadataResult<HashSet<UploadId>>;

    /// Fetch the given uploads. Unknown identifiers are ignored; a row with
    /// a malformed byte source fails the whole call.
    async fn get_uploads(&self, ids: &[UploadId]) -> MetadataResult<Vec<SourceUpload>>;

    /// Uploads embedded in at least one post body.
    async fn post_referenced_ids(&self) -> MetadataResult<HashSet<UploadId>>;

    /// Uploads used as a user avatar.
    async fn avatar_ids(&self) -> MetadataResult<HashSet<UploadId>>;
}
