//! Fixer pass: find bookkeeping rows whose stored object has disappeared.

use crate::error::{PipelineError, PipelineResult};
use crate::retry::{RetryPolicy, retry_if};
use crate::runner::{Outcome, Pass, ProgressSnapshot, Producer, RunOptions, Status, run_pass};
use async_trait::async_trait;
use ferry_core::{MigratedUpload, UploadId};
use ferry_metadata::MigrationRepo;
use ferry_storage::UploadStore;
use std::sync::Arc;
use tracing::{info, warn};

const PAGE_SIZE: u32 = 1000;

/// Result of checking one bookkeeping row against storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectCheck {
    Present,
    Missing { key: String },
}

pub struct Fixer {
    output: Arc<dyn MigrationRepo>,
    store: UploadStore,
    retry: RetryPolicy,
    delete_missing: bool,
}

impl Fixer {
    pub fn new(
        output: Arc<dyn MigrationRepo>,
        store: UploadStore,
        retry: RetryPolicy,
        delete_missing: bool,
    ) -> Self {
        Self {
            output,
            store,
            retry,
            delete_missing,
        }
    }

    pub async fn run(self, options: RunOptions) -> PipelineResult<ProgressSnapshot> {
        run_pass(Arc::new(self), options).await
    }

    async fn check(&self, record: &MigratedUpload) -> PipelineResult<ObjectCheck> {
        let Some(descriptor) = record.descriptor()? else {
            return Err(PipelineError::Record(ferry_core::Error::InvalidRecord {
                id: record.id.to_string(),
                reason: "row has no stored object".to_string(),
            }));
        };
        let key = UploadStore::compute_path(&descriptor)?;

        let store = &self.store;
        let path = key.as_str();
        let exists = retry_if(
            self.retry,
            move |_| async move { Ok::<_, PipelineError>(store.exists(path).await?) },
            PipelineError::is_transient,
        )
        .await?;

        Ok(if exists {
            ObjectCheck::Present
        } else {
            ObjectCheck::Missing { key }
        })
    }
}

#[async_trait]
impl Pass for Fixer {
    type Item = MigratedUpload;
    type Output = ObjectCheck;
    type Resource = ();

    fn name(&self) -> &'static str {
        "fix"
    }

    fn item_id(&self, item: &MigratedUpload) -> UploadId {
        item.id.clone()
    }

    async fn init_resource(&self) -> PipelineResult<()> {
        Ok(())
    }

    async fn produce(&self, producer: &Producer<MigratedUpload, ObjectCheck>) -> PipelineResult<()> {
        producer.plan(self.output.count_created().await?).await?;

        let mut after: Option<UploadId> = None;
        loop {
            let page = self.output.list_created(after.as_ref(), PAGE_SIZE).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id.clone());
            let full = page.len() as u32 == PAGE_SIZE;
            for record in page {
                producer.enqueue(record).await?;
            }
            if !full {
                break;
            }
        }
        Ok(())
    }

    async fn process(&self, item: MigratedUpload, _resource: &mut ()) -> PipelineResult<ObjectCheck> {
        self.check(&item).await
    }

    async fn record(&self, status: Status<ObjectCheck>) -> PipelineResult<Outcome> {
        match status {
            Status::Done {
                output: ObjectCheck::Present,
                ..
            } => Ok(Outcome::Ok),
            Status::Done {
                id,
                output: ObjectCheck::Missing { key },
            } => {
                if self.delete_missing {
                    self.output.delete_migration(&id).await?;
                    info!(upload_id = %id, %key, "deleted row for missing object");
                } else {
                    warn!(upload_id = %id, %key, "stored object missing");
                }
                Ok(Outcome::Missing)
            }
            Status::Failed { .. } => Ok(Outcome::Error),
        }
    }
}
