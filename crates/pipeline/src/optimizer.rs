//! Optimizer pass: derivative images for uploads that content actually uses.

use crate::error::{PipelineError, PipelineResult};
use crate::render::{ContentRenderer, DerivedSet, ImageDeriver, ResizeMode, ScratchPost};
use crate::retry::{RetryPolicy, retry_if};
use crate::runner::{Outcome, Pass, ProgressSnapshot, Producer, RunOptions, Status, run_pass};
use async_trait::async_trait;
use ferry_core::config::OptimizerConfig;
use ferry_core::{Derivative, ImageKind, MigratedUpload, OptimizedImage, UploadDescriptor, UploadId};
use ferry_metadata::{MigrationRepo, SourceRepo};
use ferry_storage::UploadStore;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PAGE_SIZE: u32 = 1000;

/// How the optimizer treats one migrated upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    AlreadyOptimized,
    Post,
    Avatar,
    Unreferenced,
}

impl Classification {
    pub fn kind(self) -> Option<ImageKind> {
        match self {
            Self::Post => Some(ImageKind::Post),
            Self::Avatar => Some(ImageKind::Avatar),
            Self::AlreadyOptimized | Self::Unreferenced => None,
        }
    }
}

/// Read-only identifier sets loaded once before any worker starts.
#[derive(Clone, Debug, Default)]
pub struct MembershipSets {
    pub optimized: HashSet<UploadId>,
    pub post_referenced: HashSet<UploadId>,
    pub avatars: HashSet<UploadId>,
}

impl MembershipSets {
    pub fn classify(&self, id: &UploadId) -> Classification {
        if self.optimized.contains(id) {
            Classification::AlreadyOptimized
        } else if self.post_referenced.contains(id) {
            Classification::Post
        } else if self.avatars.contains(id) {
            Classification::Avatar
        } else {
            Classification::Unreferenced
        }
    }
}

/// A migrated image and the reason it needs derivatives.
#[derive(Clone, Debug)]
pub struct OptimizeWork {
    pub record: MigratedUpload,
    pub kind: ImageKind,
}

pub struct Optimizer {
    source: Arc<dyn SourceRepo>,
    output: Arc<dyn MigrationRepo>,
    deriver: ImageDeriver,
    renderer: ContentRenderer,
    avatar_sizes: Vec<u32>,
    retry: RetryPolicy,
    /// Serializes derivative generation when parallel generation is off.
    generation_lock: Option<Mutex<()>>,
}

impl Optimizer {
    pub fn new(
        source: Arc<dyn SourceRepo>,
        output: Arc<dyn MigrationRepo>,
        store: UploadStore,
        config: &OptimizerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            output,
            deriver: ImageDeriver::new(store),
            renderer: ContentRenderer::new(config.max_image_width, config.max_image_height),
            avatar_sizes: config.avatar_sizes.clone(),
            retry,
            generation_lock: (!config.parallel).then(|| Mutex::new(())),
        }
    }

    /// Load the membership sets and the candidate count, each on its own task.
    pub async fn load_sets(&self) -> PipelineResult<(MembershipSets, u64)> {
        let output = self.output.clone();
        let optimized = tokio::spawn(async move { output.optimized_ids().await });
        let source = self.source.clone();
        let post_referenced = tokio::spawn(async move { source.post_referenced_ids().await });
        let source = self.source.clone();
        let avatars = tokio::spawn(async move { source.avatar_ids().await });
        let output = self.output.clone();
        let candidates = tokio::spawn(async move { output.count_created().await });

        let (optimized, post_referenced, avatars, candidates) =
            tokio::try_join!(optimized, post_referenced, avatars, candidates)?;
        let sets = MembershipSets {
            optimized: optimized?,
            post_referenced: post_referenced?,
            avatars: avatars?,
        };
        Ok((sets, candidates?))
    }

    pub async fn run(self, options: RunOptions) -> PipelineResult<ProgressSnapshot> {
        let (sets, candidates) = self.load_sets().await?;
        info!(
            candidates,
            optimized = sets.optimized.len(),
            post_referenced = sets.post_referenced.len(),
            avatars = sets.avatars.len(),
            "loaded membership sets"
        );
        let job = Arc::new(OptimizeJob {
            optimizer: self,
            sets,
            candidates,
        });
        run_pass(job, options).await
    }

    async fn optimize(
        &self,
        work: &OptimizeWork,
        scratch: &mut ScratchPost,
    ) -> PipelineResult<Vec<Derivative>> {
        let Some(descriptor) = work.record.descriptor()? else {
            return Err(PipelineError::Record(ferry_core::Error::InvalidRecord {
                id: work.record.id.to_string(),
                reason: "row has no stored object".to_string(),
            }));
        };

        let (sizes, mode) = match work.kind {
            ImageKind::Post => {
                let raw = work.record.markdown.as_deref().unwrap_or_default();
                (self.renderer.render(scratch, raw, &descriptor)?, ResizeMode::Exact)
            }
            ImageKind::Avatar => (
                self.avatar_sizes.iter().map(|&s| (s, s)).collect(),
                ResizeMode::Fill,
            ),
        };

        let _guard = match &self.generation_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let descriptor = &descriptor;
        let sizes = sizes.as_slice();
        retry_if(
            self.retry,
            move |_| async move { self.generate_validated(descriptor, sizes, mode).await },
            PipelineError::is_transient,
        )
        .await
    }

    /// Generate every derivative and confirm each one is stored and clean.
    /// On any failure every key this attempt wrote is removed.
    async fn generate_validated(
        &self,
        descriptor: &UploadDescriptor,
        sizes: &[(u32, u32)],
        mode: ResizeMode,
    ) -> PipelineResult<Vec<Derivative>> {
        let DerivedSet {
            derivatives,
            written,
        } = self.deriver.derive(descriptor, sizes, mode).await?;

        let mut problem = None;
        for derivative in &derivatives {
            if let Some(error) = derivative.errors.first() {
                problem = Some(format!("{}: {error}", derivative.key));
                break;
            }
            match self.deriver.store().exists(&derivative.key).await {
                Ok(true) => {}
                Ok(false) => {
                    problem = Some(format!("{} missing after write", derivative.key));
                    break;
                }
                Err(e) => {
                    problem = Some(format!("{}: {e}", derivative.key));
                    break;
                }
            }
        }

        let Some(problem) = problem else {
            return Ok(derivatives);
        };
        for key in &written {
            if let Err(e) = self.deriver.store().remove(key).await {
                warn!(key = %key, error = %e, "failed to remove derivative");
            }
        }
        Err(PipelineError::Derivatives(problem))
    }
}

/// One optimizer run over fixed membership sets.
pub struct OptimizeJob {
    optimizer: Optimizer,
    sets: MembershipSets,
    candidates: u64,
}

#[async_trait]
impl Pass for OptimizeJob {
    type Item = OptimizeWork;
    type Output = OptimizedImage;
    type Resource = ScratchPost;

    fn name(&self) -> &'static str {
        "optimize"
    }

    fn item_id(&self, item: &OptimizeWork) -> UploadId {
        item.record.id.clone()
    }

    async fn init_resource(&self) -> PipelineResult<ScratchPost> {
        Ok(ScratchPost::new())
    }

    async fn produce(&self, producer: &Producer<OptimizeWork, OptimizedImage>) -> PipelineResult<()> {
        producer.plan(self.candidates).await?;

        let mut after: Option<UploadId> = None;
        let mut unreferenced = 0u64;
        loop {
            let page = self.optimizer.output.list_created(after.as_ref(), PAGE_SIZE).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id.clone());
            let full = page.len() as u32 == PAGE_SIZE;

            for record in page {
                if !record.references_image() {
                    continue;
                }
                let classification = self.sets.classify(&record.id);
                match classification.kind() {
                    Some(kind) => producer.enqueue(OptimizeWork { record, kind }).await?,
                    None => {
                        if classification == Classification::Unreferenced {
                            unreferenced += 1;
                        }
                    }
                }
            }
            if !full {
                break;
            }
        }

        debug!(unreferenced, "images not referenced by any content");
        Ok(())
    }

    async fn process(
        &self,
        item: OptimizeWork,
        scratch: &mut ScratchPost,
    ) -> PipelineResult<OptimizedImage> {
        let derivatives = self.optimizer.optimize(&item, scratch).await?;
        Ok(OptimizedImage {
            upload_id: item.record.id,
            derivatives,
        })
    }

    async fn record(&self, status: Status<OptimizedImage>) -> PipelineResult<Outcome> {
        match status {
            Status::Done { output, .. } => {
                if self.optimizer.output.record_optimized(&output).await? {
                    Ok(Outcome::Ok)
                } else {
                    Ok(Outcome::Skipped)
                }
            }
            Status::Failed { .. } => Ok(Outcome::Error),
        }
    }
}
