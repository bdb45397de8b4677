//! Repository traits for the three record stores.

pub mod downloads;
pub mod migrations;
pub mod source;

pub use downloads::DownloadCacheRepo;
pub use migrations::MigrationRepo;
pub use source::SourceRepo;
