//! Database rows and their mapping to domain records.

use ferry_core::{
    DownloadCacheEntry, MigratedUpload, OptimizedImage, SkipReason, SourceUpload, UploadId,
    UploadTarget,
};
use sqlx::FromRow;

// =============================================================================
// Source inventory
// =============================================================================

/// Row of the legacy `uploads` table.
#[derive(Debug, Clone, FromRow)]
pub struct SourceUploadRow {
    pub id: String,
    pub filename: String,
    pub display_filename: Option<String>,
    pub description: Option<String>,
    #[sqlx(rename = "type")]
    pub kind: Option<String>,
    pub data: Option<Vec<u8>>,
    pub url: Option<String>,
    pub path: Option<String>,
}

impl TryFrom<SourceUploadRow> for SourceUpload {
    type Error = ferry_core::Error;

    fn try_from(row: SourceUploadRow) -> Result<Self, Self::Error> {
        let mut upload =
            SourceUpload::from_columns(row.id.into(), row.filename, row.data, row.url, row.path)?;
        upload.display_filename = row.display_filename.filter(|s| !s.is_empty());
        upload.description = row.description.filter(|s| !s.is_empty());
        upload.target = row.kind.as_deref().map(UploadTarget::parse);
        Ok(upload)
    }
}

// =============================================================================
// Bookkeeping
// =============================================================================

/// Row of the bookkeeping `uploads` table.
#[derive(Debug, Clone, FromRow)]
pub struct MigratedUploadRow {
    pub id: String,
    pub upload: Option<String>,
    pub markdown: Option<String>,
    pub skip_reason: Option<String>,
    pub error_detail: Option<String>,
}

impl TryFrom<MigratedUploadRow> for MigratedUpload {
    type Error = ferry_core::Error;

    fn try_from(row: MigratedUploadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            upload: row.upload,
            markdown: row.markdown,
            skip_reason: row.skip_reason.as_deref().map(SkipReason::parse).transpose()?,
            error_detail: row.error_detail,
        })
    }
}

/// Row of the `optimized_images` table.
#[derive(Debug, Clone, FromRow)]
pub struct OptimizedImageRow {
    pub upload_id: String,
    pub optimized_images: String,
}

impl TryFrom<OptimizedImageRow> for OptimizedImage {
    type Error = ferry_core::Error;

    fn try_from(row: OptimizedImageRow) -> Result<Self, Self::Error> {
        OptimizedImage::from_json(UploadId::from(row.upload_id), &row.optimized_images)
    }
}

/// Totals reported by `ferry status` and at the end of each pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub total: u64,
    pub created: u64,
    pub file_not_found: u64,
    pub too_many_retries: u64,
    pub errors: u64,
    pub optimized: u64,
}

impl MigrationSummary {
    pub fn skipped(&self) -> u64 {
        self.file_not_found + self.too_many_retries + self.errors
    }

    pub(crate) fn count_skip(&mut self, reason: SkipReason, n: u64) {
        match reason {
            SkipReason::FileNotFound => self.file_not_found += n,
            SkipReason::TooManyRetries => self.too_many_retries += n,
            SkipReason::Error => self.errors += n,
        }
    }
}

// =============================================================================
// Download cache
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct DownloadRow {
    pub id: String,
    pub original_filename: String,
}

impl From<DownloadRow> for DownloadCacheEntry {
    fn from(row: DownloadRow) -> Self {
        Self {
            id: row.id.into(),
            original_filename: row.original_filename,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::ByteSource;

    fn row() -> SourceUploadRow {
        SourceUploadRow {
            id: "17".to_string(),
            filename: "cat.png".to_string(),
            display_filename: Some(String::new()),
            description: Some("a cat".to_string()),
            kind: Some("avatar".to_string()),
            data: None,
            url: Some("https://example.com/cat.png".to_string()),
            path: None,
        }
    }

    #[test]
    fn test_source_row_maps_to_record() {
        let upload = SourceUpload::try_from(row()).unwrap();
        assert_eq!(upload.id.as_str(), "17");
        assert!(matches!(upload.source, ByteSource::Remote { .. }));
        assert_eq!(upload.display_filename, None);
        assert_eq!(upload.target, Some(UploadTarget::Avatar));
    }

    #[test]
    fn test_source_row_with_two_sources_rejected() {
        let mut row = row();
        row.path = Some("a/b".to_string());
        assert!(SourceUpload::try_from(row).is_err());
    }

    #[test]
    fn test_unknown_skip_reason_rejected() {
        let row = MigratedUploadRow {
            id: "1".to_string(),
            upload: None,
            markdown: None,
            skip_reason: Some("bogus".to_string()),
            error_detail: None,
        };
        assert!(MigratedUpload::try_from(row).is_err());
    }
}
