use super::mocks::FlakyBackend;
use ferry_core::config::PathSubstitution;
use ferry_core::{SourceUpload, UploadId};
use ferry_metadata::memory::{MemoryDownloadCache, MemoryMigrations, MemorySource};
use ferry_pipeline::{ByteAcquirer, Downloader, LocalResolver, RetryPolicy, RunOptions, Uploader};
use ferry_storage::UploadStore;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Retry policy with negligible delays.
#[allow(dead_code)]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
    }
}

/// A small encoded image with a gradient so resizes are not trivial.
#[allow(dead_code)]
pub fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

#[allow(dead_code)]
pub fn inline_upload(id: &str, filename: &str, data: Vec<u8>) -> SourceUpload {
    SourceUpload::from_columns(UploadId::from(id), filename.to_string(), Some(data), None, None)
        .unwrap()
}

#[allow(dead_code)]
pub fn remote_upload(id: &str, filename: &str, url: String) -> SourceUpload {
    SourceUpload::from_columns(UploadId::from(id), filename.to_string(), None, Some(url), None)
        .unwrap()
}

#[allow(dead_code)]
pub fn local_upload(id: &str, filename: &str, relative_path: &str) -> SourceUpload {
    SourceUpload::from_columns(
        UploadId::from(id),
        filename.to_string(),
        None,
        None,
        Some(relative_path.to_string()),
    )
    .unwrap()
}

/// In-memory stores, a controllable object store and scratch directories.
#[allow(dead_code)]
pub struct Harness {
    pub source: Arc<MemorySource>,
    pub output: Arc<MemoryMigrations>,
    pub cache: Arc<MemoryDownloadCache>,
    pub backend: Arc<FlakyBackend>,
    pub store: UploadStore,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::with_backend(FlakyBackend::new())
    }

    pub fn with_backend(backend: FlakyBackend) -> Self {
        let backend = Arc::new(backend);
        let store = UploadStore::new(backend.clone(), "/uploads");
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("files")).unwrap();
        Self {
            source: Arc::new(MemorySource::new()),
            output: Arc::new(MemoryMigrations::new()),
            cache: Arc::new(MemoryDownloadCache::new()),
            backend,
            store,
            dir,
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    pub fn files_root(&self) -> PathBuf {
        self.dir.path().join("files")
    }

    /// Write a file below the local search root.
    pub fn write_local(&self, relative: &str, data: &[u8]) -> PathBuf {
        let path = self.files_root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, data).unwrap();
        path
    }

    pub fn downloader(&self, max_bytes: u64) -> Downloader {
        Downloader::new(
            self.cache.clone(),
            self.download_dir(),
            max_bytes,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    pub fn acquirer(&self, max_bytes: u64) -> ByteAcquirer {
        let local = LocalResolver::new(
            vec![self.files_root()],
            vec![PathSubstitution {
                from: "legacy/".to_string(),
                to: String::new(),
            }],
        );
        ByteAcquirer::new(self.downloader(max_bytes), local)
    }

    pub fn uploader(&self, delete_surplus: bool) -> Uploader {
        self.uploader_with_limit(delete_surplus, 1024 * 1024)
    }

    pub fn uploader_with_limit(&self, delete_surplus: bool, max_bytes: u64) -> Uploader {
        Uploader::new(
            self.source.clone(),
            self.output.clone(),
            self.store.clone(),
            self.acquirer(max_bytes),
            fast_retry(),
            delete_surplus,
        )
    }

    /// Files left in the download directory, including partial ones.
    pub fn downloaded_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.download_dir(), &mut out);
        out
    }
}

#[allow(dead_code)]
pub fn options(workers: usize) -> RunOptions {
    RunOptions::new(workers, 8)
}

/// Inventory with one valid inline row and one row naming two byte sources.
#[allow(dead_code)]
pub async fn create_source_db(path: &Path) {
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{Connection, SqliteConnection};

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&opts).await.unwrap();
    sqlx::raw_sql(ferry_metadata::store::SOURCE_SCHEMA_SQL)
        .execute(&mut conn)
        .await
        .unwrap();
    sqlx::query("INSERT INTO uploads (id, filename, data) VALUES ('good', 'a.txt', ?)")
        .bind(b"hello".as_slice())
        .execute(&mut conn)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO uploads (id, filename, data, url) VALUES ('bad', 'b.txt', ?, 'https://x/b')",
    )
    .bind(b"hello".as_slice())
    .execute(&mut conn)
    .await
    .unwrap();
    conn.close().await.unwrap();
}

/// Local HTTP server that closes the first `drops` connections without a
/// response, then answers every request with `200` and `body`.
///
/// Returns the base URL and a counter of accepted connections.
#[allow(dead_code)]
pub async fn flaky_http_server(drops: usize, body: &'static [u8]) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            if counter.fetch_add(1, Ordering::SeqCst) < drops {
                drop(socket);
                continue;
            }
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), accepted)
}
