//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid source record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid skip reason: {0}")]
    InvalidSkipReason(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
