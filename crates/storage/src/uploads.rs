//! Content-addressed upload storage.
//!
//! [`UploadStore`] is the boundary the migration passes talk to: it turns a
//! resolved file into a stored object, computes where an upload's bytes live
//! and checks or removes them.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::Bytes;
use ferry_core::upload::extension_of;
use ferry_core::{ContentHash, UploadDescriptor, UploadTarget};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Options for [`UploadStore::create`].
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Filename recorded on the descriptor; also decides the extension.
    pub filename: String,
    pub description: Option<String>,
    pub target: Option<UploadTarget>,
    /// Pixel dimensions for images, read by the caller.
    pub dimensions: Option<(u32, u32)>,
}

/// Result of [`UploadStore::create`].
#[derive(Clone, Debug)]
pub struct StoredUpload {
    pub descriptor: UploadDescriptor,
    /// False when identical content already sat under the key and nothing
    /// was written. Only a written object may be removed on failure.
    pub written: bool,
}

/// Upload-level view over an [`ObjectStore`].
#[derive(Clone)]
pub struct UploadStore {
    objects: Arc<dyn ObjectStore>,
    public_url: String,
}

impl UploadStore {
    pub fn new(objects: Arc<dyn ObjectStore>, public_url: impl Into<String>) -> Self {
        Self {
            objects,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The underlying object store.
    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn is_external(&self) -> bool {
        self.objects.is_external()
    }

    pub fn backend_name(&self) -> &'static str {
        self.objects.backend_name()
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.objects.health_check().await
    }

    /// Key of an original upload with the given content hash.
    pub fn original_key(hash: &ContentHash, extension: Option<&str>) -> String {
        with_extension(
            format!("original/{}/{}", hash.shard(), hash.to_hex()),
            extension,
        )
    }

    /// Key of a resized derivative of the upload with the given content hash.
    pub fn derivative_key(
        hash: &ContentHash,
        width: u32,
        height: u32,
        extension: Option<&str>,
    ) -> String {
        with_extension(
            format!(
                "optimized/{}/{}_{width}x{height}",
                hash.shard(),
                hash.to_hex()
            ),
            extension,
        )
    }

    /// Recompute where a descriptor's bytes are expected to live.
    ///
    /// Derived from the content hash, not the key recorded in the descriptor,
    /// so a tampered or stale `key` field cannot point verification elsewhere.
    pub fn compute_path(descriptor: &UploadDescriptor) -> StorageResult<String> {
        let hash = ContentHash::from_hex(&descriptor.sha256)
            .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
        Ok(Self::original_key(&hash, descriptor.extension.as_deref()))
    }

    /// Public URL for an object key.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.public_url)
    }

    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.objects.exists(key).await
    }

    /// Store the file at `path` and describe the result.
    ///
    /// Identical content always maps to the same key, which other uploads
    /// may already point at. An existing object is left untouched.
    pub async fn create(&self, path: &Path, options: CreateOptions) -> StorageResult<StoredUpload> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.display().to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        self.create_from_bytes(Bytes::from(data), options).await
    }

    pub async fn create_from_bytes(
        &self,
        data: Bytes,
        options: CreateOptions,
    ) -> StorageResult<StoredUpload> {
        if data.is_empty() {
            return Err(StorageError::EmptyObject(options.filename));
        }

        let hash = ContentHash::compute(&data);
        let extension = extension_of(&options.filename);
        let key = Self::original_key(&hash, extension.as_deref());
        let filesize = data.len() as u64;

        let written = if self.objects.exists(&key).await? {
            debug!(key = %key, "identical content already stored");
            false
        } else {
            self.objects.put(&key, data).await?;
            debug!(key = %key, size = filesize, "stored upload");
            true
        };

        let (width, height) = match options.dimensions {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        };

        let descriptor = UploadDescriptor {
            sha256: hash.to_hex(),
            original_filename: options.filename,
            filesize,
            extension,
            url: self.url_for(&key),
            key,
            width,
            height,
            description: options.description,
            target: options.target,
        };
        Ok(StoredUpload { descriptor, written })
    }

    /// Remove an upload's original object. Missing objects are not an error.
    pub async fn destroy(&self, descriptor: &UploadDescriptor) -> StorageResult<()> {
        let key = Self::compute_path(descriptor)?;
        self.remove(&key).await
    }

    /// Delete a key, treating a missing object as already removed.
    pub async fn remove(&self, key: &str) -> StorageResult<()> {
        match self.objects.delete(key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects.get(key).await
    }

    pub async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        if data.is_empty() {
            return Err(StorageError::EmptyObject(key.to_string()));
        }
        self.objects.put(key, data).await
    }
}

fn with_extension(stem: String, extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !ext.is_empty() => format!("{stem}.{ext}"),
        _ => stem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;

    fn store() -> UploadStore {
        UploadStore::new(Arc::new(MemoryBackend::new()), "https://cdn.example.com/uploads/")
    }

    #[test]
    fn test_key_layout() {
        let hash = ContentHash::compute(b"hello");
        let hex = hash.to_hex();

        let key = UploadStore::original_key(&hash, Some("png"));
        assert_eq!(
            key,
            format!("original/{}/{}/{hex}.png", &hex[0..2], &hex[2..4])
        );

        let key = UploadStore::derivative_key(&hash, 120, 90, Some("png"));
        assert_eq!(
            key,
            format!("optimized/{}/{}/{hex}_120x90.png", &hex[0..2], &hex[2..4])
        );

        assert!(!UploadStore::original_key(&hash, None).contains('.'));
    }

    #[tokio::test]
    async fn test_create_and_compute_path_agree() {
        let store = store();
        let descriptor = store
            .create_from_bytes(
                Bytes::from_static(b"image bytes"),
                CreateOptions {
                    filename: "Photo.PNG".to_string(),
                    dimensions: Some((10, 20)),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .descriptor;

        assert_eq!(descriptor.extension.as_deref(), Some("png"));
        assert_eq!(descriptor.filesize, 11);
        assert_eq!(descriptor.width, Some(10));
        assert_eq!(UploadStore::compute_path(&descriptor).unwrap(), descriptor.key);
        assert_eq!(
            descriptor.url,
            format!("https://cdn.example.com/uploads/{}", descriptor.key)
        );
        assert!(store.exists(&descriptor.key).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = store()
            .create(&dir.path().join("nope.txt"), CreateOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let result = store()
            .create_from_bytes(Bytes::new(), CreateOptions::default())
            .await;
        assert!(matches!(result, Err(StorageError::EmptyObject(_))));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let store = store();
        let descriptor = store
            .create_from_bytes(
                Bytes::from_static(b"data"),
                CreateOptions {
                    filename: "a.txt".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .descriptor;

        store.destroy(&descriptor).await.unwrap();
        assert!(!store.exists(&descriptor.key).await.unwrap());
        store.destroy(&descriptor).await.unwrap();
    }
}
