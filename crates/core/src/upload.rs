//! Upload records on both sides of the migration.

use crate::markdown;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Extensions treated as images when deciding on reference text and derivatives.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Stable identifier shared by the source inventory and the bookkeeping store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UploadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UploadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where the bytes of a legacy upload come from.
#[derive(Clone, PartialEq, Eq)]
pub enum ByteSource {
    /// Bytes embedded directly in the inventory.
    Inline(Vec<u8>),
    /// Bytes fetched over HTTP(S).
    Remote { url: String },
    /// Bytes found on a local filesystem below one of the configured roots.
    Local {
        relative_path: PathBuf,
        filename: String,
    },
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(data) => write!(f, "Inline({} bytes)", data.len()),
            Self::Remote { url } => f.debug_struct("Remote").field("url", url).finish(),
            Self::Local {
                relative_path,
                filename,
            } => f
                .debug_struct("Local")
                .field("relative_path", relative_path)
                .field("filename", filename)
                .finish(),
        }
    }
}

/// What the migrated upload will be attached to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadTarget {
    Avatar,
    PostAttachment,
    Other(String),
}

impl UploadTarget {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "avatar" => Self::Avatar,
            "post_attachment" | "post attachment" | "attachment" => Self::PostAttachment,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Avatar => "avatar",
            Self::PostAttachment => "post_attachment",
            Self::Other(s) => s,
        }
    }
}

/// A legacy file reference read from the intermediate store.
#[derive(Clone, Debug)]
pub struct SourceUpload {
    pub id: UploadId,
    pub source: ByteSource,
    pub filename: String,
    pub display_filename: Option<String>,
    pub description: Option<String>,
    pub target: Option<UploadTarget>,
}

impl SourceUpload {
    /// Build a record from raw inventory columns.
    ///
    /// Exactly one of `data`, `url` and `path` must be populated.
    pub fn from_columns(
        id: UploadId,
        filename: String,
        data: Option<Vec<u8>>,
        url: Option<String>,
        path: Option<String>,
    ) -> crate::Result<Self> {
        let source = match (data, url, path) {
            (Some(data), None, None) => ByteSource::Inline(data),
            (None, Some(url), None) => ByteSource::Remote { url },
            (None, None, Some(path)) => ByteSource::Local {
                relative_path: PathBuf::from(path),
                filename: filename.clone(),
            },
            (data, url, path) => {
                let populated = [data.is_some(), url.is_some(), path.is_some()]
                    .into_iter()
                    .filter(|set| *set)
                    .count();
                return Err(crate::Error::InvalidRecord {
                    id: id.to_string(),
                    reason: format!("expected exactly one byte source, found {populated}"),
                });
            }
        };

        Ok(Self {
            id,
            source,
            filename,
            display_filename: None,
            description: None,
            target: None,
        })
    }

    /// Name shown to readers of migrated content.
    pub fn display_name(&self) -> &str {
        self.display_filename.as_deref().unwrap_or(&self.filename)
    }
}

/// Serialized description of an object created in the target store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadDescriptor {
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
    pub original_filename: String,
    pub filesize: u64,
    pub extension: Option<String>,
    /// Object key inside the store.
    pub key: String,
    /// Public URL of the object.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<UploadTarget>,
}

impl UploadDescriptor {
    pub fn is_image(&self) -> bool {
        self.extension
            .as_deref()
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Why an upload was not migrated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    FileNotFound,
    TooManyRetries,
    Error,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "file not found",
            Self::TooManyRetries => "too many retries",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "file not found" => Ok(Self::FileNotFound),
            "too many retries" => Ok(Self::TooManyRetries),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::InvalidSkipReason(other.to_string())),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping row describing the outcome of migrating one upload.
///
/// `upload` is set if and only if `skip_reason` is unset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigratedUpload {
    pub id: UploadId,
    /// Serialized [`UploadDescriptor`].
    pub upload: Option<String>,
    pub markdown: Option<String>,
    pub skip_reason: Option<SkipReason>,
    pub error_detail: Option<String>,
}

impl MigratedUpload {
    /// Record a successfully created object.
    pub fn created(id: UploadId, descriptor: &UploadDescriptor, markdown: String) -> crate::Result<Self> {
        Ok(Self {
            id,
            upload: Some(descriptor.to_json()?),
            markdown: Some(markdown),
            skip_reason: None,
            error_detail: None,
        })
    }

    /// Record an upload that could not be migrated.
    pub fn skipped(id: UploadId, reason: SkipReason, error_detail: Option<String>) -> Self {
        Self {
            id,
            upload: None,
            markdown: None,
            skip_reason: Some(reason),
            error_detail,
        }
    }

    pub fn descriptor(&self) -> crate::Result<Option<UploadDescriptor>> {
        self.upload
            .as_deref()
            .map(UploadDescriptor::from_json)
            .transpose()
    }

    /// Whether the reference text embeds the object as an image.
    pub fn references_image(&self) -> bool {
        self.markdown
            .as_deref()
            .is_some_and(markdown::is_image_reference)
    }
}

/// A remote file already fetched into the download directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadCacheEntry {
    pub id: UploadId,
    pub original_filename: String,
}

/// Lowercased extension of a filename, if it has one.
pub fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}
