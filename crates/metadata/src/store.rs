//! SQLite implementations of the record stores.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{DownloadCacheRepo, MigrationRepo, SourceRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Maximum number of bound identifiers per `IN (...)` query.
const MAX_BIND_IDS: usize = 500;

async fn connect(path: &Path, read_only: bool, max_connections: u32) -> MetadataResult<Pool<Sqlite>> {
    if !read_only && let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .read_only(read_only)
        .create_if_missing(!read_only)
        .foreign_keys(true)
        // Prevent transient "database is locked" errors while another process reads.
        .busy_timeout(Duration::from_secs(5));
    let opts = if read_only {
        opts
    } else {
        opts.journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

/// Read-only source inventory.
pub struct SourceStore {
    pool: Pool<Sqlite>,
}

impl SourceStore {
    /// Open an existing inventory database. Missing files are a
    /// configuration error, never created.
    pub async fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MetadataError::Config(format!(
                "source database not found: {}",
                path.display()
            )));
        }
        let pool = connect(path, true, 4).await?;
        let store = Self { pool };
        store.health_check().await?;
        debug!(path = %path.display(), "opened source database");
        Ok(store)
    }

    /// Verify the inventory has the tables the passes read.
    pub async fn health_check(&self) -> MetadataResult<()> {
        for table in ["uploads", "post_upload_references", "users"] {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
            if !exists {
                return Err(MetadataError::Config(format!(
                    "source database has no `{table}` table"
                )));
            }
        }
        Ok(())
    }
}

/// Bookkeeping store written by the passes.
pub struct OutputStore {
    pool: Pool<Sqlite>,
}

impl OutputStore {
    /// Open or create the bookkeeping database and apply its schema.
    pub async fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        // One connection: every write is already funneled through a single task.
        let pool = connect(path.as_ref(), false, 1).await?;
        let store = Self { pool };
        store.migrate().await?;
        debug!(path = %path.as_ref().display(), "opened output database");
        Ok(store)
    }

    pub async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(OUTPUT_SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Verify the database answers queries.
    pub async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Download cache store.
pub struct DownloadCacheStore {
    pool: Pool<Sqlite>,
}

impl DownloadCacheStore {
    pub async fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let pool = connect(path.as_ref(), false, 1).await?;
        sqlx::query(DOWNLOAD_CACHE_SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use ferry_core::{DownloadCacheEntry, MigratedUpload, OptimizedImage, SkipReason, SourceUpload, UploadId};
    use sqlx::QueryBuilder;
    use std::collections::HashSet;
    use time::OffsetDateTime;

    fn id_set(ids: Vec<String>) -> HashSet<UploadId> {
        ids.into_iter().map(UploadId::from).collect()
    }

    #[async_trait]
    impl SourceRepo for SourceStore {
        async fn upload_ids(&self) -> MetadataResult<HashSet<UploadId>> {
            let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM uploads")
                .fetch_all(&self.pool)
                .await?;
            Ok(id_set(ids))
        }

        async fn get_uploads(&self, ids: &[UploadId]) -> MetadataResult<Vec<SourceUpload>> {
            let mut uploads = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(MAX_BIND_IDS) {
                let mut builder = QueryBuilder::<Sqlite>::new(
                    "SELECT id, filename, display_filename, description, type, data, url, path \
                     FROM uploads WHERE id IN (",
                );
                let mut separated = builder.separated(", ");
                for id in chunk {
                    separated.push_bind(id.as_str().to_string());
                }
                separated.push_unseparated(")");

                let rows: Vec<SourceUploadRow> =
                    builder.build_query_as().fetch_all(&self.pool).await?;
                for row in rows {
                    uploads.push(SourceUpload::try_from(row)?);
                }
            }
            Ok(uploads)
        }

        async fn post_referenced_ids(&self) -> MetadataResult<HashSet<UploadId>> {
            let ids: Vec<String> = sqlx::query_scalar(
                "SELECT DISTINCT upload_id FROM post_upload_references WHERE upload_id IS NOT NULL",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(id_set(ids))
        }

        async fn avatar_ids(&self) -> MetadataResult<HashSet<UploadId>> {
            let ids: Vec<String> = sqlx::query_scalar(
                "SELECT DISTINCT avatar_upload_id FROM users WHERE avatar_upload_id IS NOT NULL",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(id_set(ids))
        }
    }

    #[async_trait]
    impl MigrationRepo for OutputStore {
        async fn migrated_ids(&self) -> MetadataResult<HashSet<UploadId>> {
            let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM uploads")
                .fetch_all(&self.pool)
                .await?;
            Ok(id_set(ids))
        }

        async fn get_migrated(&self, id: &UploadId) -> MetadataResult<Option<MigratedUpload>> {
            let row = sqlx::query_as::<_, MigratedUploadRow>(
                "SELECT id, upload, markdown, skip_reason, error_detail FROM uploads WHERE id = ?",
            )
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(MigratedUpload::try_from).transpose()?)
        }

        async fn record_migration(&self, record: &MigratedUpload) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO uploads (id, upload, markdown, skip_reason, error_detail, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    upload = excluded.upload,
                    markdown = excluded.markdown,
                    skip_reason = excluded.skip_reason,
                    error_detail = excluded.error_detail,
                    created_at = excluded.created_at
                "#,
            )
            .bind(record.id.as_str())
            .bind(&record.upload)
            .bind(&record.markdown)
            .bind(record.skip_reason.map(|r| r.as_str()))
            .bind(&record.error_detail)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_created(
            &self,
            after: Option<&UploadId>,
            limit: u32,
        ) -> MetadataResult<Vec<MigratedUpload>> {
            let rows = sqlx::query_as::<_, MigratedUploadRow>(
                r#"
                SELECT id, upload, markdown, skip_reason, error_detail FROM uploads
                WHERE upload IS NOT NULL AND (? IS NULL OR id > ?)
                ORDER BY id
                LIMIT ?
                "#,
            )
            .bind(after.map(UploadId::as_str))
            .bind(after.map(UploadId::as_str))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter()
                .map(|row| MigratedUpload::try_from(row).map_err(MetadataError::from))
                .collect()
        }

        async fn count_created(&self) -> MetadataResult<u64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM uploads WHERE upload IS NOT NULL")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        }

        async fn delete_migration(&self, id: &UploadId) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM optimized_images WHERE upload_id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM uploads WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        }

        async fn optimized_ids(&self) -> MetadataResult<HashSet<UploadId>> {
            let ids: Vec<String> = sqlx::query_scalar("SELECT upload_id FROM optimized_images")
                .fetch_all(&self.pool)
                .await?;
            Ok(id_set(ids))
        }

        async fn get_optimized(&self, id: &UploadId) -> MetadataResult<Option<OptimizedImage>> {
            let row = sqlx::query_as::<_, OptimizedImageRow>(
                "SELECT upload_id, optimized_images FROM optimized_images WHERE upload_id = ?",
            )
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(OptimizedImage::try_from).transpose()?)
        }

        async fn record_optimized(&self, image: &OptimizedImage) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                INSERT INTO optimized_images (upload_id, optimized_images, created_at)
                VALUES (?, ?, ?)
                ON CONFLICT(upload_id) DO NOTHING
                "#,
            )
            .bind(image.upload_id.as_str())
            .bind(image.derivatives_json()?)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn summary(&self) -> MetadataResult<MigrationSummary> {
            let groups: Vec<(Option<String>, i64)> = sqlx::query_as(
                "SELECT skip_reason, COUNT(*) FROM uploads GROUP BY skip_reason",
            )
            .fetch_all(&self.pool)
            .await?;
            let optimized: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM optimized_images")
                .fetch_one(&self.pool)
                .await?;

            let mut summary = MigrationSummary {
                optimized: optimized as u64,
                ..Default::default()
            };
            for (reason, count) in groups {
                let count = count as u64;
                summary.total += count;
                match reason {
                    None => summary.created += count,
                    Some(reason) => summary.count_skip(SkipReason::parse(&reason)?, count),
                }
            }
            Ok(summary)
        }
    }

    #[async_trait]
    impl DownloadCacheRepo for DownloadCacheStore {
        async fn get_download(&self, id: &UploadId) -> MetadataResult<Option<DownloadCacheEntry>> {
            let row = sqlx::query_as::<_, DownloadRow>(
                "SELECT id, original_filename FROM downloads WHERE id = ?",
            )
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(DownloadCacheEntry::from))
        }

        async fn put_download(&self, entry: &DownloadCacheEntry) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO downloads (id, original_filename, downloaded_at) VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    original_filename = excluded.original_filename,
                    downloaded_at = excluded.downloaded_at
                "#,
            )
            .bind(entry.id.as_str())
            .bind(&entry.original_filename)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn remove_download(&self, id: &UploadId) -> MetadataResult<()> {
            sqlx::query("DELETE FROM downloads WHERE id = ?")
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}

/// Schema of the legacy inventory. The migrator never writes it; exporters
/// and test fixtures create it.
pub const SOURCE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS uploads (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    display_filename TEXT,
    description TEXT,
    type TEXT,
    data BLOB,
    url TEXT,
    path TEXT
);

CREATE TABLE IF NOT EXISTS post_upload_references (
    post_id TEXT NOT NULL,
    upload_id TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_post_upload_references_upload ON post_upload_references(upload_id);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    avatar_upload_id TEXT
);
"#;

const OUTPUT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS uploads (
    id TEXT PRIMARY KEY,
    upload TEXT,
    markdown TEXT,
    skip_reason TEXT,
    error_detail TEXT,
    created_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_uploads_created ON uploads(id) WHERE upload IS NOT NULL;

CREATE TABLE IF NOT EXISTS optimized_images (
    upload_id TEXT PRIMARY KEY REFERENCES uploads(id) ON DELETE CASCADE,
    optimized_images TEXT NOT NULL,
    created_at TEXT
);
"#;

const DOWNLOAD_CACHE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS downloads (
    id TEXT PRIMARY KEY,
    original_filename TEXT NOT NULL,
    downloaded_at TEXT
);
"#;
