//! Resolve the bytes of a source upload to a local file.

pub mod download;
pub mod local;

pub use download::{DownloadedFile, Downloader};
pub use local::LocalResolver;

use crate::error::{PipelineError, PipelineResult};
use ferry_core::{ByteSource, SourceUpload};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A source upload's bytes on local disk.
///
/// Inline blobs are spilled to a temporary file that is removed when this
/// value is dropped.
#[derive(Debug)]
pub struct ResolvedFile {
    path: PathBuf,
    /// Filename reported by the origin, if it differs from the inventory's.
    pub origin_filename: Option<String>,
    _temp: Option<NamedTempFile>,
}

impl ResolvedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Turns any [`ByteSource`] into a [`ResolvedFile`].
pub struct ByteAcquirer {
    downloader: Downloader,
    local: LocalResolver,
}

impl ByteAcquirer {
    pub fn new(downloader: Downloader, local: LocalResolver) -> Self {
        Self { downloader, local }
    }

    /// Resolve an upload's bytes.
    ///
    /// A local file missing below every root yields
    /// [`PipelineError::FileNotFound`].
    pub async fn resolve(&self, upload: &SourceUpload) -> PipelineResult<ResolvedFile> {
        match &upload.source {
            ByteSource::Inline(data) => {
                let data = data.clone();
                let temp = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
                    let mut temp = NamedTempFile::new()?;
                    temp.write_all(&data)?;
                    temp.flush()?;
                    Ok(temp)
                })
                .await??;
                Ok(ResolvedFile {
                    path: temp.path().to_path_buf(),
                    origin_filename: None,
                    _temp: Some(temp),
                })
            }
            ByteSource::Remote { url } => {
                let file = self.downloader.fetch(&upload.id, url).await?;
                Ok(ResolvedFile {
                    path: file.path,
                    origin_filename: Some(file.original_filename),
                    _temp: None,
                })
            }
            ByteSource::Local {
                relative_path,
                filename,
            } => match self.local.resolve(relative_path, filename).await {
                Some(path) => Ok(ResolvedFile {
                    path,
                    origin_filename: None,
                    _temp: None,
                }),
                None => Err(PipelineError::FileNotFound(
                    relative_path.join(filename).display().to_string(),
                )),
            },
        }
    }
}
