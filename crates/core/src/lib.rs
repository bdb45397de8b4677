//! Core domain types and shared logic for the ferry upload migrator.
//!
//! This crate defines the data model used across all other crates:
//! - Source upload records read from the legacy inventory
//! - Bookkeeping records describing migration outcomes
//! - Stored object descriptors and their reference text
//! - Optimized image derivatives
//! - Configuration for storage, stores and the three passes

pub mod config;
pub mod error;
pub mod hash;
pub mod image;
pub mod markdown;
pub mod upload;

pub use error::{Error, Result};
pub use hash::ContentHash;
pub use image::{Derivative, ImageKind, OptimizedImage};
pub use upload::{
    ByteSource, DownloadCacheEntry, MigratedUpload, SkipReason, SourceUpload, UploadDescriptor,
    UploadId, UploadTarget,
};

/// Default hard ceiling for a single remote download: 1 GiB.
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 1024 * 1024 * 1024;

/// Default capacity of the work and status queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
