//! Pipeline error types.

use ferry_metadata::MetadataError;
use ferry_storage::StorageError;
use thiserror::Error;

/// Errors raised while processing a pass or one of its items.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("invalid record: {0}")]
    Record(#[from] ferry_core::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("download of {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("stored object missing after write: {0}")]
    Verification(String),

    #[error("derivative validation failed: {0}")]
    Derivatives(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("work queue closed")]
    QueueClosed,

    #[error("task failed: {0}")]
    Task(String),

    #[error("worker panicked: {0}")]
    Panic(String),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => !matches!(
                e,
                StorageError::InvalidKey(_)
                    | StorageError::EmptyObject(_)
                    | StorageError::Config(_)
            ),
            Self::Verification(_) | Self::Derivatives(_) => true,
            Self::Download(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_panic() {
            PipelineError::Panic(e.to_string())
        } else {
            PipelineError::Task(e.to_string())
        }
    }
}
