use ferry_metadata::store::SOURCE_SCHEMA_SQL;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::path::Path;

/// A row for the legacy `uploads` table.
#[allow(dead_code)]
#[derive(Default)]
pub struct SourceRow<'a> {
    pub id: &'a str,
    pub filename: &'a str,
    pub kind: Option<&'a str>,
    pub data: Option<&'a [u8]>,
    pub url: Option<&'a str>,
    pub path: Option<&'a str>,
}

/// Create an inventory database the way the legacy exporter would.
#[allow(dead_code)]
pub async fn create_source_db(
    path: &Path,
    rows: &[SourceRow<'_>],
    post_refs: &[&str],
    avatars: &[&str],
) {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&opts).await.unwrap();
    sqlx::query(SOURCE_SCHEMA_SQL)
        .execute(&mut conn)
        .await
        .unwrap();

    for row in rows {
        sqlx::query(
            "INSERT INTO uploads (id, filename, type, data, url, path) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row.id)
        .bind(row.filename)
        .bind(row.kind)
        .bind(row.data)
        .bind(row.url)
        .bind(row.path)
        .execute(&mut conn)
        .await
        .unwrap();
    }
    for (i, id) in post_refs.iter().enumerate() {
        sqlx::query("INSERT INTO post_upload_references (post_id, upload_id) VALUES (?, ?)")
            .bind(format!("post-{i}"))
            .bind(id)
            .execute(&mut conn)
            .await
            .unwrap();
    }
    for (i, id) in avatars.iter().enumerate() {
        sqlx::query("INSERT INTO users (id, avatar_upload_id) VALUES (?, ?)")
            .bind(format!("user-{i}"))
            .bind(id)
            .execute(&mut conn)
            .await
            .unwrap();
    }
    conn.close().await.unwrap();
}
