//! Remote downloads with a size ceiling and a resumable cache.

use crate::error::{PipelineError, PipelineResult};
use ferry_core::{ContentHash, DownloadCacheEntry, UploadId};
use ferry_metadata::DownloadCacheRepo;
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// A remote file available on local disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub original_filename: String,
}

/// Fetches remote uploads into a download directory.
pub struct Downloader {
    client: reqwest::Client,
    cache: Arc<dyn DownloadCacheRepo>,
    dir: PathBuf,
    max_bytes: u64,
}

impl Downloader {
    pub fn new(
        cache: Arc<dyn DownloadCacheRepo>,
        dir: impl Into<PathBuf>,
        max_bytes: u64,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ferry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            cache,
            dir: dir.into(),
            max_bytes,
        })
    }

    /// Where the bytes of `id` are kept once downloaded.
    pub fn cache_path(&self, id: &UploadId) -> PathBuf {
        cache_path(&self.dir, id)
    }

    /// Return the cached file for `id`, downloading it first if needed.
    ///
    /// HTTP errors and oversized bodies are permanent failures; partial
    /// data is never left behind. Transport errors are left for the caller
    /// to retry.
    pub async fn fetch(&self, id: &UploadId, url: &str) -> PipelineResult<DownloadedFile> {
        let path = self.cache_path(id);

        if let Some(entry) = self.cache.get_download(id).await? {
            if tokio::fs::try_exists(&path).await? {
                debug!(upload_id = %id, "using cached download");
                return Ok(DownloadedFile {
                    path,
                    original_filename: entry.original_filename,
                });
            }
            warn!(upload_id = %id, path = %path.display(), "cached download is gone, fetching again");
            self.cache.remove_download(id).await?;
        }

        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(PipelineError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(self.too_large(url));
        }

        let original_filename = filename_from_headers(response.headers())
            .or_else(|| filename_from_url(response.url()))
            .unwrap_or_else(|| id.to_string());

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = path.with_extension(format!("part.{}", Uuid::new_v4()));
        let written = self.stream_to(&mut response, &part, url).await;
        match written {
            Ok(bytes) => {
                tokio::fs::rename(&part, &path).await?;
                debug!(upload_id = %id, bytes, "download complete");
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        }

        self.cache
            .put_download(&DownloadCacheEntry {
                id: id.clone(),
                original_filename: original_filename.clone(),
            })
            .await?;

        Ok(DownloadedFile {
            path,
            original_filename,
        })
    }

    async fn stream_to(
        &self,
        response: &mut reqwest::Response,
        part: &Path,
        url: &str,
    ) -> PipelineResult<u64> {
        let mut file = tokio::fs::File::create(part).await?;
        let mut total: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            total += chunk.len() as u64;
            if total > self.max_bytes {
                return Err(self.too_large(url));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(total)
    }

    fn too_large(&self, url: &str) -> PipelineError {
        PipelineError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        }
    }
}

/// `{dir}/{ab}/{cd}/{h}` where `h` is the hex SHA-256 of the identifier.
pub fn cache_path(dir: &Path, id: &UploadId) -> PathBuf {
    let hash = ContentHash::compute(id.as_str().as_bytes());
    dir.join(hash.shard()).join(hash.to_hex())
}

fn filename_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    parse_content_disposition(value)
}

/// Filename from a `Content-Disposition` value. Prefers the RFC 5987
/// `filename*` form, which is only accepted when it needs no decoding.
fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;
    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.split("''").nth(1).unwrap_or(raw);
                if !encoded.contains('%') {
                    extended = Some(encoded.to_string());
                }
            }
            "filename" => plain = Some(raw.to_string()),
            _ => {}
        }
    }
    extended
        .or(plain)
        .map(|name| sanitize_filename(&name))
        .filter(|name| !name.is_empty())
}

fn filename_from_url(url: &reqwest::Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .map(sanitize_filename)
        .filter(|name| !name.is_empty())
}

// Keep only the last path component; the name is metadata, never a path.
fn sanitize_filename(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim().to_string()
}
