//! Uploader pass: migrate pending source uploads into the target store.

use crate::acquire::ByteAcquirer;
use crate::error::{PipelineError, PipelineResult};
use crate::retry::{RetryPolicy, retry_if};
use crate::runner::{Outcome, Pass, ProgressSnapshot, Producer, RunOptions, Status, run_pass};
use async_trait::async_trait;
use ferry_core::markdown::reference_text;
use ferry_core::upload::{IMAGE_EXTENSIONS, extension_of};
use ferry_core::{MigratedUpload, SkipReason, SourceUpload, UploadDescriptor, UploadId};
use ferry_metadata::{MigrationRepo, SourceRepo};
use ferry_storage::{CreateOptions, StoredUpload, UploadStore};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const FETCH_BATCH: usize = 1000;

/// Identifiers still to migrate and bookkeeping rows without a source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// In the source but not yet recorded, sorted.
    pub pending: Vec<UploadId>,
    /// Recorded but no longer in the source, sorted.
    pub surplus: Vec<UploadId>,
}

impl Reconciliation {
    pub fn compute(source: &HashSet<UploadId>, output: &HashSet<UploadId>) -> Self {
        let mut pending: Vec<UploadId> = source.difference(output).cloned().collect();
        let mut surplus: Vec<UploadId> = output.difference(source).cloned().collect();
        pending.sort();
        surplus.sort();
        Self { pending, surplus }
    }
}

/// Totals of an uploader run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReport {
    pub pending: usize,
    pub surplus: usize,
    pub surplus_deleted: usize,
    pub progress: ProgressSnapshot,
}

/// Work item: a source record, or the identifier of one that failed to load.
#[derive(Debug)]
pub enum UploadWork {
    Record(SourceUpload),
    Invalid { id: UploadId, reason: String },
}

pub struct Uploader {
    source: Arc<dyn SourceRepo>,
    output: Arc<dyn MigrationRepo>,
    store: UploadStore,
    acquirer: ByteAcquirer,
    retry: RetryPolicy,
    delete_surplus: bool,
}

impl Uploader {
    pub fn new(
        source: Arc<dyn SourceRepo>,
        output: Arc<dyn MigrationRepo>,
        store: UploadStore,
        acquirer: ByteAcquirer,
        retry: RetryPolicy,
        delete_surplus: bool,
    ) -> Self {
        Self {
            source,
            output,
            store,
            acquirer,
            retry,
            delete_surplus,
        }
    }

    /// Compare source and bookkeeping, deleting surplus rows when enabled.
    ///
    /// Runs before any worker starts, so the deletions cannot race the
    /// status task.
    pub async fn reconcile(&self) -> PipelineResult<(Reconciliation, usize)> {
        let (source_ids, output_ids) =
            tokio::try_join!(self.source.upload_ids(), self.output.migrated_ids())?;
        let reconciliation = Reconciliation::compute(&source_ids, &output_ids);

        let mut deleted = 0;
        if self.delete_surplus {
            for id in &reconciliation.surplus {
                if self.output.delete_migration(id).await? {
                    deleted += 1;
                }
            }
            info!(surplus = reconciliation.surplus.len(), deleted, "deleted surplus bookkeeping rows");
        } else if !reconciliation.surplus.is_empty() {
            info!(
                surplus = reconciliation.surplus.len(),
                "bookkeeping rows without a source upload left in place"
            );
        }

        Ok((reconciliation, deleted))
    }

    /// Reconcile, then migrate every pending upload.
    pub async fn run(self, options: RunOptions) -> PipelineResult<UploadReport> {
        let (reconciliation, surplus_deleted) = self.reconcile().await?;
        let pending = reconciliation.pending.len();
        let surplus = reconciliation.surplus.len();
        info!(pending, surplus, "reconciled source and bookkeeping");

        let job = Arc::new(UploadJob {
            uploader: self,
            pending: reconciliation.pending,
        });
        let progress = run_pass(job, options).await?;

        Ok(UploadReport {
            pending,
            surplus,
            surplus_deleted,
            progress,
        })
    }

    async fn migrate(&self, upload: SourceUpload) -> PipelineResult<MigratedUpload> {
        let source = &upload;
        let acquired = retry_if(
            self.retry,
            move |_| self.acquirer.resolve(source),
            PipelineError::is_transient,
        )
        .await;
        let resolved = match acquired {
            Ok(resolved) => resolved,
            Err(PipelineError::FileNotFound(path)) => {
                return Ok(MigratedUpload::skipped(
                    upload.id,
                    SkipReason::FileNotFound,
                    Some(path),
                ));
            }
            Err(e) if e.is_transient() => {
                return Ok(MigratedUpload::skipped(
                    upload.id,
                    SkipReason::TooManyRetries,
                    Some(e.to_string()),
                ));
            }
            Err(e) => return Err(e),
        };

        let filename = choose_filename(&upload, resolved.origin_filename.as_deref());
        let dimensions = if is_image_name(&filename) {
            read_dimensions(resolved.path().to_path_buf()).await
        } else {
            None
        };
        let options = CreateOptions {
            filename,
            description: upload.description.clone(),
            target: upload.target.clone(),
            dimensions,
        };

        let created = retry_if(
            self.retry,
            |_| self.create_verified(resolved.path(), options.clone()),
            PipelineError::is_transient,
        )
        .await;

        match created {
            Ok(descriptor) => {
                let markdown = reference_text(&descriptor, upload.display_name());
                Ok(MigratedUpload::created(upload.id, &descriptor, markdown)?)
            }
            Err(e) if e.is_transient() => Ok(MigratedUpload::skipped(
                upload.id,
                SkipReason::TooManyRetries,
                Some(e.to_string()),
            )),
            Err(e) => Err(e),
        }
    }

    /// Create the object and confirm it is readable where it should be.
    /// A failed check removes the object only if this attempt wrote it;
    /// an existing object may back other recorded uploads.
    async fn create_verified(
        &self,
        path: &Path,
        options: CreateOptions,
    ) -> PipelineResult<UploadDescriptor> {
        let StoredUpload { descriptor, written } = self.store.create(path, options).await?;
        let key = UploadStore::compute_path(&descriptor)?;

        let error = match self.store.exists(&key).await {
            Ok(true) => return Ok(descriptor),
            Ok(false) => PipelineError::Verification(key),
            Err(e) => PipelineError::Storage(e),
        };
        if written {
            if let Err(e) = self.store.destroy(&descriptor).await {
                warn!(key = %descriptor.key, error = %e, "failed to remove unverified object");
            }
        }
        Err(error)
    }
}

/// The inventory name wins unless it lacks an extension the origin supplies.
fn choose_filename(upload: &SourceUpload, origin: Option<&str>) -> String {
    let name = upload.display_name();
    match origin {
        Some(origin) if extension_of(name).is_none() && extension_of(origin).is_some() => {
            origin.to_string()
        }
        _ => name.to_string(),
    }
}

fn is_image_name(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

async fn read_dimensions(path: PathBuf) -> Option<(u32, u32)> {
    let read = tokio::task::spawn_blocking(move || {
        image::ImageReader::open(&path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(std::io::Error::other)
    })
    .await;
    match read {
        Ok(Ok(dimensions)) => Some(dimensions),
        Ok(Err(e)) => {
            warn!(error = %e, "could not read image dimensions");
            None
        }
        Err(e) => {
            warn!(error = %e, "dimension read task failed");
            None
        }
    }
}

/// One uploader run over a fixed pending set.
pub struct UploadJob {
    uploader: Uploader,
    pending: Vec<UploadId>,
}

impl UploadJob {
    async fn fetch_batch(&self, ids: &[UploadId]) -> Vec<UploadWork> {
        match self.uploader.source.get_uploads(ids).await {
            Ok(uploads) => {
                let mut work: Vec<UploadWork> = uploads.into_iter().map(UploadWork::Record).collect();
                if work.len() < ids.len() {
                    let found: HashSet<UploadId> =
                        work.iter().map(|item| self.item_id(item)).collect();
                    let missing: Vec<&UploadId> =
                        ids.iter().filter(|id| !found.contains(*id)).collect();
                    warn!(count = missing.len(), "pending uploads vanished from the source");
                    work.extend(missing.into_iter().map(vanished));
                }
                work
            }
            Err(batch_error) => {
                // Isolate the bad rows so the rest of the batch still migrates.
                warn!(error = %batch_error, "batch fetch failed, fetching individually");
                let mut work = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.uploader.source.get_uploads(std::slice::from_ref(id)).await {
                        Ok(uploads) if uploads.is_empty() => {
                            warn!(upload_id = %id, "pending upload vanished from the source");
                            work.push(vanished(id));
                        }
                        Ok(uploads) => work.extend(uploads.into_iter().map(UploadWork::Record)),
                        Err(e) => work.push(UploadWork::Invalid {
                            id: id.clone(),
                            reason: e.to_string(),
                        }),
                    }
                }
                work
            }
        }
    }
}

/// A pending identifier the source no longer returns.
fn vanished(id: &UploadId) -> UploadWork {
    UploadWork::Invalid {
        id: id.clone(),
        reason: "no longer present in the source".to_string(),
    }
}

#[async_trait]
impl Pass for UploadJob {
    type Item = UploadWork;
    type Output = MigratedUpload;
    type Resource = ();

    fn name(&self) -> &'static str {
        "upload"
    }

    fn item_id(&self, item: &UploadWork) -> UploadId {
        match item {
            UploadWork::Record(upload) => upload.id.clone(),
            UploadWork::Invalid { id, .. } => id.clone(),
        }
    }

    async fn init_resource(&self) -> PipelineResult<()> {
        Ok(())
    }

    async fn produce(&self, producer: &Producer<UploadWork, MigratedUpload>) -> PipelineResult<()> {
        producer.plan(self.pending.len() as u64).await?;
        for batch in self.pending.chunks(FETCH_BATCH) {
            for work in self.fetch_batch(batch).await {
                producer.enqueue(work).await?;
            }
        }
        Ok(())
    }

    async fn process(&self, item: UploadWork, _resource: &mut ()) -> PipelineResult<MigratedUpload> {
        match item {
            UploadWork::Record(upload) => self.uploader.migrate(upload).await,
            UploadWork::Invalid { id, reason } => {
                Err(PipelineError::Record(ferry_core::Error::InvalidRecord {
                    id: id.to_string(),
                    reason,
                }))
            }
        }
    }

    async fn record(&self, status: Status<MigratedUpload>) -> PipelineResult<Outcome> {
        let record = match status {
            Status::Done { output, .. } => output,
            Status::Failed { id, error } => {
                MigratedUpload::skipped(id, SkipReason::Error, Some(error.to_string()))
            }
        };
        self.uploader.output.record_migration(&record).await?;

        Ok(match record.skip_reason {
            None => Outcome::Ok,
            Some(SkipReason::FileNotFound | SkipReason::TooManyRetries) => Outcome::Skipped,
            Some(SkipReason::Error) => Outcome::Error,
        })
    }
}
