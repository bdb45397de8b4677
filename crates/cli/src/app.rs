//! Wiring between configuration, the record stores and the passes.

use anyhow::{Context, Result};
use ferry_core::config::AppConfig;
use ferry_metadata::{DownloadCacheStore, MigrationRepo, OutputStore, SourceStore};
use ferry_pipeline::{
    ByteAcquirer, Downloader, Fixer, LocalResolver, Optimizer, ProgressSnapshot, RetryPolicy,
    RunOptions, Uploader, worker_count,
};
use ferry_storage::UploadStore;
use std::sync::Arc;

/// Object store and bookkeeping store, opened and checked.
pub struct App {
    config: AppConfig,
    store: UploadStore,
    output: Arc<OutputStore>,
}

impl App {
    /// Open the stores every pass needs. Any failure here aborts the run.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let objects = ferry_storage::from_config(&config.storage)
            .await
            .context("failed to initialize storage")?;
        let store = UploadStore::new(objects, config.storage.public_url());
        store
            .health_check()
            .await
            .context("storage health check failed")?;
        tracing::info!(backend = store.backend_name(), "Storage ready");

        let output = OutputStore::open(&config.output.path)
            .await
            .with_context(|| {
                format!("failed to open output database {}", config.output.path.display())
            })?;
        output
            .health_check()
            .await
            .context("output database health check failed")?;

        Ok(Self {
            config,
            store,
            output: Arc::new(output),
        })
    }

    async fn source(&self) -> Result<Arc<SourceStore>> {
        let path = &self.config.source.path;
        let source = SourceStore::open(path)
            .await
            .with_context(|| format!("failed to open source database {}", path.display()))?;
        Ok(Arc::new(source))
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.pipeline)
    }

    fn run_options(&self) -> RunOptions {
        let pipeline = &self.config.pipeline;
        let workers = worker_count(pipeline.thread_factor, self.store.is_external());
        let mut options = RunOptions::new(workers, pipeline.queue_capacity);
        options.progress_interval = pipeline.progress_interval;
        options
    }

    pub async fn upload(self) -> Result<()> {
        let source = self.source().await?;
        let uploader_config = &self.config.uploader;
        let cache_config = &self.config.download_cache;

        let cache = DownloadCacheStore::open(&cache_config.path)
            .await
            .with_context(|| {
                format!("failed to open download cache {}", cache_config.path.display())
            })?;
        let downloader = Downloader::new(
            Arc::new(cache),
            cache_config.download_dir.clone(),
            uploader_config.max_download_bytes,
            uploader_config.download_timeout(),
        )
        .context("failed to build HTTP client")?;
        let local = LocalResolver::new(
            uploader_config.local_roots.clone(),
            uploader_config.path_substitutions.clone(),
        );

        let uploader = Uploader::new(
            source,
            self.output.clone(),
            self.store.clone(),
            ByteAcquirer::new(downloader, local),
            self.retry(),
            uploader_config.delete_surplus,
        );
        let report = uploader
            .run(self.run_options())
            .await
            .context("upload pass failed")?;

        tracing::info!(
            pending = report.pending,
            surplus = report.surplus,
            surplus_deleted = report.surplus_deleted,
            "Upload pass complete"
        );
        report_totals(&report.progress);
        Ok(())
    }

    pub async fn fix(self) -> Result<()> {
        let fixer = Fixer::new(
            self.output.clone(),
            self.store.clone(),
            self.retry(),
            self.config.fixer.delete_missing,
        );
        let snapshot = fixer
            .run(self.run_options())
            .await
            .context("fix pass failed")?;
        report_totals(&snapshot);
        Ok(())
    }

    pub async fn optimize(self) -> Result<()> {
        let optimizer = Optimizer::new(
            self.source().await?,
            self.output.clone(),
            self.store.clone(),
            &self.config.optimizer,
            self.retry(),
        );
        let snapshot = optimizer
            .run(self.run_options())
            .await
            .context("optimize pass failed")?;
        report_totals(&snapshot);
        Ok(())
    }
}

/// Errors are for operator follow-up; they do not fail the command.
fn report_totals(snapshot: &ProgressSnapshot) {
    if snapshot.errors > 0 {
        tracing::warn!(
            pass = snapshot.pass,
            errors = snapshot.errors,
            "Pass finished with errors, see bookkeeping rows for details"
        );
    }
    println!(
        "{}: processed {} (ok {}, skipped {}, missing {}, errors {})",
        snapshot.pass,
        snapshot.processed,
        snapshot.ok,
        snapshot.skipped,
        snapshot.missing,
        snapshot.errors
    );
}

pub async fn print_status(config: &AppConfig) -> Result<()> {
    let output = OutputStore::open(&config.output.path)
        .await
        .with_context(|| format!("failed to open output database {}", config.output.path.display()))?;
    let summary = output.summary().await.context("failed to read bookkeeping totals")?;

    println!("Uploads recorded: {}", summary.total);
    println!("  migrated:          {}", summary.created);
    println!("  file not found:    {}", summary.file_not_found);
    println!("  too many retries:  {}", summary.too_many_retries);
    println!("  error:             {}", summary.errors);
    println!("Optimized images:    {}", summary.optimized);
    Ok(())
}
