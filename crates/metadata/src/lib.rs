//! Record stores for the ferry upload migrator.
//!
//! Three independent stores back a migration run:
//! - The source inventory (read-only) listing legacy uploads
//! - The bookkeeping store recording migration outcomes and derivatives
//! - The download cache remembering remote files already fetched
//!
//! Each is a narrow repository trait with a SQLite implementation and an
//! in-memory one for tests.

pub mod error;
pub mod memory;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::MigrationSummary;
pub use repos::{DownloadCacheRepo, MigrationRepo, SourceRepo};
pub use store::{DownloadCacheStore, OutputStore, SourceStore};
