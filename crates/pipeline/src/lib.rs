//! Migration passes for ferry.
//!
//! Every pass runs on the same skeleton: one producer, a bounded work queue,
//! a pool of workers and a single status task that owns all bookkeeping
//! writes and progress counters.
//!
//! - [`Uploader`] copies pending legacy uploads into the object store
//! - [`Fixer`] finds bookkeeping rows whose object has disappeared
//! - [`Optimizer`] generates derivative images for referenced uploads

pub mod acquire;
pub mod error;
pub mod fixer;
pub mod metrics;
pub mod optimizer;
pub mod render;
pub mod retry;
pub mod runner;
pub mod uploader;
pub mod workers;

pub use acquire::{ByteAcquirer, Downloader, LocalResolver};
pub use error::{PipelineError, PipelineResult};
pub use fixer::{Fixer, ObjectCheck};
pub use optimizer::{Classification, MembershipSets, Optimizer};
pub use retry::{RetryPolicy, retry, retry_if};
pub use runner::{Outcome, Pass, ProgressSnapshot, RunOptions, Status, run_pass};
pub use uploader::{Reconciliation, UploadReport, Uploader};
pub use workers::worker_count;
