//! Bounded producer / worker pool / status task skeleton shared by all passes.
//!
//! A run is wired as
//!
//! ```text
//! producer ──work queue──▶ N workers ──status queue──▶ status task ──▶ bookkeeping
//! ```
//!
//! Both queues are bounded: the producer waits while the work queue is full
//! and workers wait while the status queue is full. The status task is the
//! only code that writes bookkeeping or touches progress counters.
//!
//! Shutdown follows the data: the work queue closes when the producer
//! returns, workers exit once it is drained, and the status queue closes
//! when the last worker drops its sender.

use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use async_trait::async_trait;
use ferry_core::UploadId;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How one item ended, as counted in progress snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Skipped,
    Missing,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Missing => "missing",
            Self::Error => "error",
        }
    }
}

/// Result of one unit of work, sent from a worker to the status task.
#[derive(Debug)]
pub enum Status<O> {
    Done { id: UploadId, output: O },
    Failed { id: UploadId, error: PipelineError },
}

/// Running totals owned by the status task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub pass: &'static str,
    /// Candidate items for the run, once known.
    pub planned: Option<u64>,
    pub processed: u64,
    pub ok: u64,
    pub skipped: u64,
    pub missing: u64,
    pub errors: u64,
}

impl ProgressSnapshot {
    fn new(pass: &'static str) -> Self {
        Self {
            pass,
            ..Default::default()
        }
    }

    fn count(&mut self, outcome: Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Ok => self.ok += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Missing => self.missing += 1,
            Outcome::Error => self.errors += 1,
        }
    }
}

enum Event<O> {
    Planned(u64),
    Item(Status<O>),
}

/// Producer side of a run: enqueues work and announces how much to expect.
pub struct Producer<T, O> {
    work: mpsc::Sender<T>,
    status: mpsc::Sender<Event<O>>,
}

impl<T: Send, O: Send> Producer<T, O> {
    /// Enqueue one item, waiting while the queue is full.
    pub async fn enqueue(&self, item: T) -> PipelineResult<()> {
        self.work
            .send(item)
            .await
            .map_err(|_| PipelineError::QueueClosed)
    }

    /// Announce the candidate count for this run.
    pub async fn plan(&self, total: u64) -> PipelineResult<()> {
        self.status
            .send(Event::Planned(total))
            .await
            .map_err(|_| PipelineError::QueueClosed)
    }
}

/// One migration pass plugged into [`run_pass`].
#[async_trait]
pub trait Pass: Send + Sync + 'static {
    type Item: Send + 'static;
    type Output: Send + 'static;
    /// Per-worker scratch state, created once when the worker starts.
    type Resource: Send + 'static;

    fn name(&self) -> &'static str;

    fn item_id(&self, item: &Self::Item) -> UploadId;

    async fn init_resource(&self) -> PipelineResult<Self::Resource>;

    /// Enqueue every item of the run.
    async fn produce(&self, producer: &Producer<Self::Item, Self::Output>) -> PipelineResult<()>;

    /// Process one item on a worker.
    async fn process(
        &self,
        item: Self::Item,
        resource: &mut Self::Resource,
    ) -> PipelineResult<Self::Output>;

    /// Persist one result. Runs on the status task only.
    async fn record(&self, status: Status<Self::Output>) -> PipelineResult<Outcome>;
}

/// Sizing and reporting for one run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Log a progress line every this many recorded items.
    pub progress_interval: u64,
    pub progress: Option<watch::Sender<ProgressSnapshot>>,
}

impl RunOptions {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            progress_interval: 1000,
            progress: None,
        }
    }

    /// Publish progress snapshots through a watch channel.
    pub fn with_progress(mut self, sender: watch::Sender<ProgressSnapshot>) -> Self {
        self.progress = Some(sender);
        self
    }
}

/// Run a pass to completion and return the final totals.
///
/// Per-item errors and panics become [`Status::Failed`] events. Only a
/// failing producer or a failing resource initialization aborts the run.
pub async fn run_pass<P: Pass>(pass: Arc<P>, options: RunOptions) -> PipelineResult<ProgressSnapshot> {
    let name = pass.name();
    let workers = options.workers.max(1);
    let capacity = options.queue_capacity.max(1);

    // Resources first, so a broken setup fails before any work is queued.
    let mut resources = Vec::with_capacity(workers);
    for _ in 0..workers {
        resources.push(pass.init_resource().await?);
    }

    metrics::register_metrics();
    metrics::set_workers(name, workers);
    info!(pass = name, workers, queue_capacity = capacity, "starting pass");

    let (work_tx, work_rx) = mpsc::channel::<P::Item>(capacity);
    let (status_tx, status_rx) = mpsc::channel::<Event<P::Output>>(capacity);

    let status_handle = tokio::spawn(status_task(
        pass.clone(),
        status_rx,
        options.progress_interval.max(1),
        options.progress.clone(),
    ));

    let work_rx = Arc::new(Mutex::new(work_rx));
    let mut worker_handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
    for (index, resource) in resources.into_iter().enumerate() {
        worker_handles.push(tokio::spawn(worker(
            pass.clone(),
            index,
            resource,
            work_rx.clone(),
            status_tx.clone(),
        )));
    }

    let producer = Producer {
        work: work_tx,
        status: status_tx,
    };
    let producer_pass = pass.clone();
    let producer_handle = tokio::spawn(async move {
        let result = producer_pass.produce(&producer).await;
        // Dropping the producer closes the work queue.
        drop(producer);
        result
    });

    let produced = producer_handle.await;

    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!(pass = name, error = %e, "worker task failed");
        }
    }

    let snapshot = status_handle.await?;
    metrics::set_workers(name, 0);

    match produced {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(pass = name, error = %e, "producer failed");
            return Err(e);
        }
        Err(e) => return Err(e.into()),
    }

    info!(
        pass = name,
        processed = snapshot.processed,
        ok = snapshot.ok,
        skipped = snapshot.skipped,
        missing = snapshot.missing,
        errors = snapshot.errors,
        "pass finished"
    );
    Ok(snapshot)
}

async fn worker<P: Pass>(
    pass: Arc<P>,
    index: usize,
    mut resource: P::Resource,
    work: Arc<Mutex<mpsc::Receiver<P::Item>>>,
    status: mpsc::Sender<Event<P::Output>>,
) {
    debug!(pass = pass.name(), worker = index, "worker started");
    loop {
        // Hold the lock only while waiting for the next item.
        let item = { work.lock().await.recv().await };
        let Some(item) = item else { break };

        let id = pass.item_id(&item);
        let result = AssertUnwindSafe(pass.process(item, &mut resource))
            .catch_unwind()
            .await;
        let event = match result {
            Ok(Ok(output)) => Status::Done { id, output },
            Ok(Err(error)) => Status::Failed { id, error },
            Err(panic) => Status::Failed {
                id,
                error: PipelineError::Panic(panic_message(panic.as_ref())),
            },
        };

        if status.send(Event::Item(event)).await.is_err() {
            warn!(pass = pass.name(), worker = index, "status queue closed, stopping worker");
            break;
        }
    }
    debug!(pass = pass.name(), worker = index, "worker stopped");
}

async fn status_task<P: Pass>(
    pass: Arc<P>,
    mut events: mpsc::Receiver<Event<P::Output>>,
    progress_interval: u64,
    progress: Option<watch::Sender<ProgressSnapshot>>,
) -> ProgressSnapshot {
    let name = pass.name();
    let mut snapshot = ProgressSnapshot::new(name);

    while let Some(event) = events.recv().await {
        match event {
            Event::Planned(total) => {
                snapshot.planned = Some(total);
                info!(pass = name, planned = total, "work planned");
            }
            Event::Item(status) => {
                let id = match &status {
                    Status::Done { id, .. } | Status::Failed { id, .. } => id.clone(),
                };
                if let Status::Failed { id, error } = &status {
                    warn!(pass = name, upload_id = %id, error = %error, "item failed");
                }

                let outcome = match pass.record(status).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(pass = name, upload_id = %id, error = %e, "failed to record result");
                        Outcome::Error
                    }
                };
                snapshot.count(outcome);
                metrics::record_outcome(name, outcome.as_str());

                if snapshot.processed % progress_interval == 0 {
                    info!(
                        pass = name,
                        processed = snapshot.processed,
                        planned = snapshot.planned,
                        ok = snapshot.ok,
                        skipped = snapshot.skipped,
                        missing = snapshot.missing,
                        errors = snapshot.errors,
                        "progress"
                    );
                }
            }
        }

        if let Some(progress) = &progress {
            progress.send_replace(snapshot.clone());
        }
    }

    snapshot
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
