//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
        /// Base URL prefixed to object keys in reference text.
        #[serde(default = "default_public_url")]
        public_url: String,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient credential chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
        /// Base URL prefixed to object keys in reference text.
        #[serde(default = "default_public_url")]
        public_url: String,
    },
}

fn default_public_url() -> String {
    "/uploads".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
            public_url: default_public_url(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }

    /// Base URL for objects created in this store.
    pub fn public_url(&self) -> &str {
        match self {
            StorageConfig::Filesystem { public_url, .. } | StorageConfig::S3 { public_url, .. } => {
                public_url
            }
        }
    }
}

/// Intermediate (legacy inventory) store. Opened read-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_path")]
    pub path: PathBuf,
}

fn default_source_path() -> PathBuf {
    PathBuf::from("./data/intermediate.db")
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
        }
    }
}

/// Bookkeeping store written by the passes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./data/uploads.db")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

/// Download cache for remote byte sources.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadCacheConfig {
    /// SQLite file holding resolved filenames.
    #[serde(default = "default_download_cache_path")]
    pub path: PathBuf,
    /// Directory where fetched files are kept between runs.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_download_cache_path() -> PathBuf {
    PathBuf::from("./data/downloads.db")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./data/downloads")
}

impl Default for DownloadCacheConfig {
    fn default() -> Self {
        Self {
            path: default_download_cache_path(),
            download_dir: default_download_dir(),
        }
    }
}

/// Settings shared by every pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Multiplier applied to the logical CPU count when sizing the worker pool.
    #[serde(default = "default_thread_factor")]
    pub thread_factor: f64,
    /// Capacity of the work queue and of the status queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum attempts for retryable steps.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Base delay for linear backoff (attempt N waits N times this).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Log a progress line every this many recorded items.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

fn default_thread_factor() -> f64 {
    1.5
}

fn default_queue_capacity() -> usize {
    crate::DEFAULT_QUEUE_CAPACITY
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_progress_interval() -> u64 {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thread_factor: default_thread_factor(),
            queue_capacity: default_queue_capacity(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl PipelineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Validate pipeline settings that would stall or crash a run.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.thread_factor.is_finite() && self.thread_factor > 0.0) {
            return Err(format!(
                "pipeline.thread_factor must be a positive number, got {}",
                self.thread_factor
            ));
        }
        if self.queue_capacity == 0 {
            return Err("pipeline.queue_capacity cannot be 0".to_string());
        }
        if self.retry_max_attempts == 0 {
            return Err("pipeline.retry_max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Replace a fragment of a legacy relative path before searching the roots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSubstitution {
    pub from: String,
    pub to: String,
}

/// Uploader pass configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Delete bookkeeping rows whose identifier no longer exists in the source.
    /// Disabled by default; the surplus is only reported.
    #[serde(default)]
    pub delete_surplus: bool,
    /// Ordered list of directories searched for local byte sources.
    #[serde(default)]
    pub local_roots: Vec<PathBuf>,
    /// Alternative spellings of relative paths tried after the original.
    #[serde(default)]
    pub path_substitutions: Vec<PathSubstitution>,
    /// Hard ceiling for a single remote download.
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
    /// Timeout for a single HTTP download.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_max_download_bytes() -> u64 {
    crate::DEFAULT_MAX_DOWNLOAD_BYTES
}

fn default_download_timeout_secs() -> u64 {
    300
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            delete_surplus: false,
            local_roots: Vec::new(),
            path_substitutions: Vec::new(),
            max_download_bytes: default_max_download_bytes(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl UploaderConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Fixer pass configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixerConfig {
    /// Delete bookkeeping rows (and their optimized images) whose object is gone.
    #[serde(default = "default_delete_missing")]
    pub delete_missing: bool,
}

fn default_delete_missing() -> bool {
    true
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            delete_missing: default_delete_missing(),
        }
    }
}

/// Optimizer pass configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Allow workers to generate derivatives concurrently. When false,
    /// generation is serialized behind a lock owned by the optimizer.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Square sizes generated for avatars.
    #[serde(default = "default_avatar_sizes")]
    pub avatar_sizes: Vec<u32>,
    /// Bounding box for thumbnails of images embedded in posts.
    #[serde(default = "default_max_image_width")]
    pub max_image_width: u32,
    #[serde(default = "default_max_image_height")]
    pub max_image_height: u32,
}

fn default_parallel() -> bool {
    true
}

fn default_avatar_sizes() -> Vec<u32> {
    vec![20, 25, 32, 45, 48, 60, 64, 90, 96, 120, 135, 144, 240, 360]
}

fn default_max_image_width() -> u32 {
    690
}

fn default_max_image_height() -> u32 {
    500
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            avatar_sizes: default_avatar_sizes(),
            max_image_width: default_max_image_width(),
            max_image_height: default_max_image_height(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.avatar_sizes.is_empty() || self.avatar_sizes.contains(&0) {
            return Err("optimizer.avatar_sizes must be non-empty and positive".to_string());
        }
        if self.max_image_width == 0 || self.max_image_height == 0 {
            return Err("optimizer.max_image_width/height must be positive".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub download_cache: DownloadCacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub uploader: UploaderConfig,
    #[serde(default)]
    pub fixer: FixerConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl AppConfig {
    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.pipeline.validate()?;
        self.optimizer.validate()?;
        Ok(())
    }
}
