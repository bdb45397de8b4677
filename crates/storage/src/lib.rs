//! Object storage abstraction and backends for ferry.
//!
//! This crate provides:
//! - A minimal object store trait (exists/get/put/delete)
//! - Backends: local filesystem, S3-compatible and in-memory
//! - [`UploadStore`], which turns resolved files into content-addressed
//!   stored objects and derives their storage paths

pub mod backends;
pub mod error;
pub mod traits;
pub mod uploads;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::ObjectStore;
pub use uploads::{CreateOptions, StoredUpload, UploadStore};

use ferry_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path, .. } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
            ..
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
