mod common;

use async_trait::async_trait;
use common::{FlakyBackend, Harness, image_bytes, inline_upload, local_upload, options, remote_upload};
use ferry_core::{MigratedUpload, SkipReason, SourceUpload, UploadId};
use ferry_metadata::memory::MemorySource;
use ferry_metadata::{MetadataResult, MigrationRepo, OutputStore, SourceRepo, SourceStore};
use ferry_pipeline::{Reconciliation, Uploader};
use ferry_storage::ObjectStore;
use httpmock::prelude::*;
use image::ImageFormat;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

async fn migrated(h: &Harness, id: &str) -> MigratedUpload {
    h.output
        .get_migrated(&UploadId::from(id))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no bookkeeping row for {id}"))
}

#[tokio::test]
async fn test_inline_image_is_migrated_with_reference_text() {
    let h = Harness::new();
    h.source
        .insert(inline_upload("1", "logo.png", image_bytes(4, 3, ImageFormat::Png)));

    let report = h.uploader(false).run(options(2)).await.unwrap();
    assert_eq!(report.pending, 1);
    assert_eq!(report.progress.planned, Some(1));
    assert_eq!(report.progress.ok, 1);

    let record = migrated(&h, "1").await;
    assert!(record.skip_reason.is_none());
    let descriptor = record.descriptor().unwrap().unwrap();
    assert_eq!((descriptor.width, descriptor.height), (Some(4), Some(3)));
    assert_eq!(
        record.markdown.as_deref(),
        Some(format!("![logo.png|4x3]({})", descriptor.url).as_str())
    );
    assert!(h.store.exists(&descriptor.key).await.unwrap());
}

#[tokio::test]
async fn test_second_run_has_nothing_to_do() {
    let h = Harness::new();
    for i in 0..5 {
        h.source
            .insert(inline_upload(&i.to_string(), "a.txt", format!("file {i}").into_bytes()));
    }

    let first = h.uploader(false).run(options(3)).await.unwrap();
    assert_eq!(first.progress.processed, 5);

    let second = h.uploader(false).run(options(3)).await.unwrap();
    assert_eq!(second.pending, 0);
    assert_eq!(second.progress.planned, Some(0));
    assert_eq!(second.progress.processed, 0);
    assert_eq!(h.output.writes().len(), 5);
}

#[tokio::test]
async fn test_concurrent_workers_write_one_row_per_upload() {
    let h = Harness::new();
    for i in 0..60 {
        h.source
            .insert(inline_upload(&format!("{i:03}"), "f.txt", format!("content {i}").into_bytes()));
    }

    let report = h.uploader(false).run(options(8)).await.unwrap();
    assert_eq!(report.progress.processed, 60);
    assert_eq!(report.progress.ok, 60);

    let writes = h.output.writes();
    let unique: HashSet<_> = writes.iter().cloned().collect();
    assert_eq!(writes.len(), 60);
    assert_eq!(unique.len(), 60);
    assert_eq!(h.output.len(), 60);
}

#[tokio::test]
async fn test_reconciliation_leaves_surplus_when_disabled() {
    let h = Harness::new();
    for id in ["1", "2", "3"] {
        h.source.insert(inline_upload(id, "a.txt", id.as_bytes().to_vec()));
    }
    for id in ["2", "3", "4"] {
        h.output
            .record_migration(&MigratedUpload::skipped(id.into(), SkipReason::Error, None))
            .await
            .unwrap();
    }

    let (reconciliation, deleted) = h.uploader(false).reconcile().await.unwrap();
    assert_eq!(
        reconciliation,
        Reconciliation {
            pending: vec!["1".into()],
            surplus: vec!["4".into()],
        }
    );
    assert_eq!(deleted, 0);
    assert!(h.output.get_migrated(&"4".into()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_reconciliation_deletes_surplus_when_enabled() {
    let h = Harness::new();
    for id in ["1", "2", "3"] {
        h.source.insert(inline_upload(id, "a.txt", id.as_bytes().to_vec()));
    }
    for id in ["2", "3", "4"] {
        h.output
            .record_migration(&MigratedUpload::skipped(id.into(), SkipReason::Error, None))
            .await
            .unwrap();
    }

    let report = h.uploader(true).run(options(2)).await.unwrap();
    assert_eq!(report.pending, 1);
    assert_eq!(report.surplus, 1);
    assert_eq!(report.surplus_deleted, 1);
    assert!(h.output.get_migrated(&"4".into()).await.unwrap().is_none());
    assert!(migrated(&h, "1").await.skip_reason.is_none());
}

#[tokio::test]
async fn test_missing_local_file_is_skipped() {
    let h = Harness::new();
    h.source.insert(local_upload("1", "gone.png", "2019/01"));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.skipped, 1);

    let record = migrated(&h, "1").await;
    assert_eq!(record.skip_reason, Some(SkipReason::FileNotFound));
    assert!(record.upload.is_none());
    assert!(h.backend.inner.is_empty());
}

#[tokio::test]
async fn test_local_file_found_through_substitution() {
    let h = Harness::new();
    h.write_local("2019/01/notes.txt", b"some notes");
    h.source.insert(local_upload("1", "notes.txt", "legacy/2019/01"));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 1);

    let record = migrated(&h, "1").await;
    let descriptor = record.descriptor().unwrap().unwrap();
    assert_eq!(descriptor.filesize, 10);
    assert_eq!(descriptor.original_filename, "notes.txt");
    assert!(record.markdown.unwrap().starts_with("[notes.txt|attachment]("));
}

#[tokio::test]
async fn test_failed_verification_destroys_and_retries() {
    let h = Harness::with_backend(FlakyBackend::new().report_missing(1));
    h.source.insert(inline_upload("1", "a.txt", b"hello".to_vec()));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 1);
    assert_eq!(h.backend.puts(), 2);
    assert_eq!(h.backend.deletes(), 1);
    assert!(migrated(&h, "1").await.skip_reason.is_none());
}

#[tokio::test]
async fn test_verification_never_passing_is_too_many_retries() {
    let h = Harness::with_backend(FlakyBackend::new().report_missing(3));
    h.source.insert(inline_upload("1", "a.txt", b"hello".to_vec()));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 0);
    assert_eq!(report.progress.skipped, 1);

    let record = migrated(&h, "1").await;
    assert_eq!(record.skip_reason, Some(SkipReason::TooManyRetries));
    assert!(record.error_detail.unwrap().contains("missing after write"));
    assert!(h.backend.inner.is_empty());
}

#[tokio::test]
async fn test_transient_put_failures_are_retried() {
    let h = Harness::with_backend(FlakyBackend::new().fail_puts(2));
    h.source.insert(inline_upload("1", "a.txt", b"hello".to_vec()));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 1);
    assert_eq!(h.backend.puts(), 3);
}

#[tokio::test]
async fn test_exists_errors_are_retried() {
    let h = Harness::with_backend(FlakyBackend::new().fail_checks(1));
    h.source.insert(inline_upload("1", "a.txt", b"hello".to_vec()));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 1);
    // The failed check comes before any write; the retry checks, writes, verifies.
    assert_eq!(h.backend.exists_checks(), 3);
    assert_eq!(h.backend.puts(), 1);
    assert_eq!(h.backend.deletes(), 0);
}

#[tokio::test]
async fn test_failed_duplicate_keeps_the_shared_object() {
    let h = Harness::new();
    h.source.insert(inline_upload("1", "a.txt", b"hello".to_vec()));
    h.uploader(false).run(options(1)).await.unwrap();
    let first = migrated(&h, "1").await.descriptor().unwrap().unwrap();

    h.source.insert(inline_upload("2", "b.txt", b"hello".to_vec()));
    h.backend.failing_checks.store(3, Ordering::SeqCst);
    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.skipped, 1);
    assert_eq!(
        migrated(&h, "2").await.skip_reason,
        Some(SkipReason::TooManyRetries)
    );

    assert_eq!(h.backend.deletes(), 0);
    assert!(h.backend.inner.exists(&first.key).await.unwrap());
}

#[tokio::test]
async fn test_duplicate_content_is_not_rewritten() {
    let h = Harness::new();
    h.source.insert(inline_upload("1", "a.txt", b"hello".to_vec()));
    h.source.insert(inline_upload("2", "b.txt", b"hello".to_vec()));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 2);
    assert_eq!(h.backend.puts(), 1);

    let first = migrated(&h, "1").await.descriptor().unwrap().unwrap();
    let second = migrated(&h, "2").await.descriptor().unwrap().unwrap();
    assert_eq!(first.key, second.key);
    assert_eq!(second.original_filename, "b.txt");
}

#[tokio::test]
async fn test_remote_upload_is_downloaded_and_cached() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/files/42");
            then.status(200)
                .header("content-disposition", "attachment; filename=\"report.pdf\"")
                .body("pdf bytes");
        })
        .await;

    let h = Harness::new();
    h.source
        .insert(remote_upload("1", "download", server.url("/files/42")));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 1);
    let descriptor = migrated(&h, "1").await.descriptor().unwrap().unwrap();
    assert_eq!(descriptor.original_filename, "report.pdf");
    assert_eq!(descriptor.extension.as_deref(), Some("pdf"));

    // Forget the row; the next run must reuse the downloaded file.
    h.output.delete_migration(&"1".into()).await.unwrap();
    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 1);
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_dropped_connection_is_retried() {
    let (base, connections) = common::flaky_http_server(1, b"hello").await;
    let h = Harness::new();
    h.source
        .insert(remote_upload("1", "f.txt", format!("{base}/f.txt")));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.ok, 1);
    assert_eq!(report.progress.errors, 0);
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    let descriptor = migrated(&h, "1").await.descriptor().unwrap().unwrap();
    assert_eq!(descriptor.filesize, 5);
    assert_eq!(h.store.get(&descriptor.key).await.unwrap().as_ref(), b"hello");
}

#[tokio::test]
async fn test_unreachable_download_is_too_many_retries() {
    let (base, connections) = common::flaky_http_server(usize::MAX, b"hello").await;
    let h = Harness::new();
    h.source
        .insert(remote_upload("1", "f.txt", format!("{base}/f.txt")));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.skipped, 1);
    assert_eq!(connections.load(Ordering::SeqCst), 3);

    let record = migrated(&h, "1").await;
    assert_eq!(record.skip_reason, Some(SkipReason::TooManyRetries));
    assert!(record.error_detail.unwrap().contains("download failed"));
    assert!(h.backend.inner.is_empty());
    assert!(h.downloaded_files().is_empty());
}

#[tokio::test]
async fn test_http_error_is_recorded_as_error() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/missing.png");
            then.status(404);
        })
        .await;

    let h = Harness::new();
    h.source
        .insert(remote_upload("1", "missing.png", server.url("/missing.png")));

    let report = h.uploader(false).run(options(1)).await.unwrap();
    assert_eq!(report.progress.errors, 1);
    mock.assert_hits_async(1).await;

    let record = migrated(&h, "1").await;
    assert_eq!(record.skip_reason, Some(SkipReason::Error));
    assert!(record.error_detail.unwrap().contains("404"));
}

#[tokio::test]
async fn test_oversized_download_creates_nothing() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/big.bin");
            then.status(200).body(vec![7u8; 4096]);
        })
        .await;

    let h = Harness::new();
    h.source
        .insert(remote_upload("1", "big.bin", server.url("/big.bin")));

    let report = h
        .uploader_with_limit(false, 1024)
        .run(options(1))
        .await
        .unwrap();
    assert_eq!(report.progress.errors, 1);

    let record = migrated(&h, "1").await;
    assert_eq!(record.skip_reason, Some(SkipReason::Error));
    assert!(record.error_detail.unwrap().contains("exceeds 1024 bytes"));
    assert!(h.backend.inner.is_empty());
    assert!(h.downloaded_files().is_empty());
}

#[tokio::test]
async fn test_malformed_source_row_becomes_error_row() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("source.db");
    common::create_source_db(&source_path).await;

    let source = Arc::new(SourceStore::open(&source_path).await.unwrap());
    let output = Arc::new(OutputStore::open(dir.path().join("output.db")).await.unwrap());

    let h = Harness::new();
    let uploader = Uploader::new(
        source,
        output.clone(),
        h.store.clone(),
        h.acquirer(1024),
        common::fast_retry(),
        false,
    );
    let report = uploader.run(options(2)).await.unwrap();
    assert_eq!(report.progress.processed, 2);
    assert_eq!(report.progress.ok, 1);
    assert_eq!(report.progress.errors, 1);

    let good = output.get_migrated(&"good".into()).await.unwrap().unwrap();
    assert!(good.skip_reason.is_none());
    let bad = output.get_migrated(&"bad".into()).await.unwrap().unwrap();
    assert_eq!(bad.skip_reason, Some(SkipReason::Error));
    assert!(bad.error_detail.unwrap().contains("exactly one byte source"));
}

/// Inventory that stops returning one upload after it has been listed.
struct ForgetfulSource {
    inner: Arc<MemorySource>,
    forgotten: UploadId,
}

#[async_trait]
impl SourceRepo for ForgetfulSource {
    async fn upload_ids(&self) -> MetadataResult<HashSet<UploadId>> {
        self.inner.upload_ids().await
    }

    async fn get_uploads(&self, ids: &[UploadId]) -> MetadataResult<Vec<SourceUpload>> {
        let mut uploads = self.inner.get_uploads(ids).await?;
        uploads.retain(|upload| upload.id != self.forgotten);
        Ok(uploads)
    }

    async fn post_referenced_ids(&self) -> MetadataResult<HashSet<UploadId>> {
        self.inner.post_referenced_ids().await
    }

    async fn avatar_ids(&self) -> MetadataResult<HashSet<UploadId>> {
        self.inner.avatar_ids().await
    }
}

#[tokio::test]
async fn test_vanished_upload_becomes_error_row() {
    let h = Harness::new();
    for id in ["1", "2", "3"] {
        h.source.insert(inline_upload(id, "a.txt", id.as_bytes().to_vec()));
    }
    let source = Arc::new(ForgetfulSource {
        inner: h.source.clone(),
        forgotten: "2".into(),
    });
    let uploader = Uploader::new(
        source,
        h.output.clone(),
        h.store.clone(),
        h.acquirer(1024),
        common::fast_retry(),
        false,
    );

    let report = uploader.run(options(2)).await.unwrap();
    assert_eq!(report.progress.planned, Some(3));
    assert_eq!(report.progress.processed, 3);
    assert_eq!(report.progress.ok, 2);
    assert_eq!(report.progress.errors, 1);

    let record = migrated(&h, "2").await;
    assert_eq!(record.skip_reason, Some(SkipReason::Error));
    assert!(record.descriptor().unwrap().is_none());
    assert!(record.error_detail.unwrap().contains("no longer present"));
}
