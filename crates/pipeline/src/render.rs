//! Image derivatives and the content renderer that requests them.

use crate::error::{PipelineError, PipelineResult};
use bytes::Bytes;
use ferry_core::{ContentHash, Derivative, UploadDescriptor};
use ferry_storage::UploadStore;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use std::io::Cursor;
use std::sync::LazyLock;
use tracing::debug;

/// `![alt|WxH](url)` with the size part optional.
static IMAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[(?P<alt>[^\]|]*)(?:\|(?P<w>\d+)x(?P<h>\d+))?\]\((?P<url>[^)\s]+)\)")
        .expect("image reference pattern is valid")
});

/// Scale factors for responsive thumbnails.
const THUMBNAIL_SCALES: &[f64] = &[1.0, 1.5, 2.0];

/// How a derivative is cut from the original.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeMode {
    /// Scale to exactly the requested size.
    Exact,
    /// Scale and center-crop to fill the requested size.
    Fill,
}

/// An image embedded in content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub alt: String,
    pub url: String,
    pub size: Option<(u32, u32)>,
}

/// Scratch post reused by one worker for every image it renders.
#[derive(Debug, Default)]
pub struct ScratchPost {
    raw: String,
    images: Vec<ImageRef>,
}

impl ScratchPost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the post body and re-parse its image references.
    pub fn set_raw(&mut self, raw: &str) {
        self.raw.clear();
        self.raw.push_str(raw);
        self.images.clear();
        for caps in IMAGE_REFERENCE.captures_iter(&self.raw) {
            let size = match (caps.name("w"), caps.name("h")) {
                (Some(w), Some(h)) => w.as_str().parse().ok().zip(h.as_str().parse().ok()),
                _ => None,
            };
            self.images.push(ImageRef {
                alt: caps["alt"].to_string(),
                url: caps["url"].to_string(),
                size,
            });
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }
}

/// Largest size with the original's aspect ratio that fits the bounding box.
/// Never upscales.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    (
        ((f64::from(width) * scale).round() as u32).max(1),
        ((f64::from(height) * scale).round() as u32).max(1),
    )
}

/// Output of [`ImageDeriver::derive`].
#[derive(Clone, Debug, Default)]
pub struct DerivedSet {
    pub derivatives: Vec<Derivative>,
    /// Keys this call wrote. Keys that already held a derivative of the same
    /// content are shared with other uploads and left out.
    pub written: Vec<String>,
}

/// Generates resized copies of stored images.
#[derive(Clone)]
pub struct ImageDeriver {
    store: UploadStore,
}

impl ImageDeriver {
    pub fn new(store: UploadStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    /// Store one derivative per size and describe them. A key that already
    /// exists is not rewritten.
    ///
    /// Per-derivative failures are reported in [`Derivative::errors`]; an
    /// original that cannot be read or decoded fails the whole call.
    pub async fn derive(
        &self,
        descriptor: &UploadDescriptor,
        sizes: &[(u32, u32)],
        mode: ResizeMode,
    ) -> PipelineResult<DerivedSet> {
        if sizes.is_empty() {
            return Ok(DerivedSet::default());
        }

        let hash = ContentHash::from_hex(&descriptor.sha256)?;
        let original = self.store.get(&UploadStore::compute_path(descriptor)?).await?;
        let (format, extension) = output_format(descriptor.extension.as_deref());

        let jobs = sizes.to_vec();
        let encoded = tokio::task::spawn_blocking(move || encode_all(&original, &jobs, mode, format))
            .await??;

        let mut derivatives = Vec::with_capacity(encoded.len());
        let mut written = Vec::new();
        for (width, height, result) in encoded {
            let key = UploadStore::derivative_key(&hash, width, height, Some(extension));
            let mut derivative = Derivative {
                width,
                height,
                key,
                filesize: 0,
                errors: Vec::new(),
            };
            match result {
                Ok(data) => {
                    derivative.filesize = data.len() as u64;
                    match self.store.exists(&derivative.key).await {
                        Ok(true) => {}
                        Ok(false) => match self.store.put(&derivative.key, Bytes::from(data)).await {
                            Ok(()) => written.push(derivative.key.clone()),
                            Err(e) => derivative.errors.push(e.to_string()),
                        },
                        Err(e) => derivative.errors.push(e.to_string()),
                    }
                }
                Err(e) => derivative.errors.push(e),
            }
            derivatives.push(derivative);
        }

        debug!(
            sha256 = %descriptor.sha256,
            count = derivatives.len(),
            written = written.len(),
            "generated derivatives"
        );
        Ok(DerivedSet {
            derivatives,
            written,
        })
    }
}

/// Encoder for an original's extension, falling back to PNG for formats
/// this build cannot write.
fn output_format(extension: Option<&str>) -> (ImageFormat, &'static str) {
    match extension.map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("jpg" | "jpeg") => (ImageFormat::Jpeg, "jpg"),
        Some("gif") => (ImageFormat::Gif, "gif"),
        Some("webp") => (ImageFormat::WebP, "webp"),
        _ => (ImageFormat::Png, "png"),
    }
}

type Encoded = Vec<(u32, u32, Result<Vec<u8>, String>)>;

fn encode_all(
    original: &[u8],
    sizes: &[(u32, u32)],
    mode: ResizeMode,
    format: ImageFormat,
) -> PipelineResult<Encoded> {
    let image = image::load_from_memory(original)?;
    Ok(sizes
        .iter()
        .map(|&(width, height)| {
            let resized = match mode {
                ResizeMode::Exact => image.resize_exact(width, height, FilterType::Lanczos3),
                ResizeMode::Fill => image.resize_to_fill(width, height, FilterType::Lanczos3),
            };
            (width, height, encode(resized, format).map_err(|e| e.to_string()))
        })
        .collect())
}

fn encode(image: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    // JPEG has no alpha channel.
    let image = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        image
    };
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format)?;
    Ok(buffer.into_inner())
}

/// Renders post content to find the thumbnails an embedded image needs.
#[derive(Clone, Debug)]
pub struct ContentRenderer {
    max_width: u32,
    max_height: u32,
}

impl ContentRenderer {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width,
            max_height,
        }
    }

    /// Thumbnail sizes for an image displayed at `width`×`height`.
    ///
    /// Sizes equal to the original are left out; an image that already fits
    /// needs no thumbnails at all.
    pub fn thumbnail_sizes(&self, width: u32, height: u32, original: (u32, u32)) -> Vec<(u32, u32)> {
        let (base_w, base_h) = fit_within(width, height, self.max_width, self.max_height);
        let mut sizes: Vec<(u32, u32)> = Vec::new();
        for scale in THUMBNAIL_SCALES {
            let w = ((f64::from(base_w) * scale).round() as u32).min(original.0);
            let h = ((f64::from(base_h) * scale).round() as u32).min(original.1);
            if (w, h) != original && !sizes.contains(&(w, h)) {
                sizes.push((w, h));
            }
        }
        sizes
    }

    /// Load `raw` into the scratch post and collect the thumbnail sizes
    /// needed by every reference to `descriptor`.
    pub fn render(
        &self,
        scratch: &mut ScratchPost,
        raw: &str,
        descriptor: &UploadDescriptor,
    ) -> PipelineResult<Vec<(u32, u32)>> {
        scratch.set_raw(raw);

        let original = match (descriptor.width, descriptor.height) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                return Err(PipelineError::Record(ferry_core::Error::InvalidRecord {
                    id: descriptor.sha256.clone(),
                    reason: "image has no recorded dimensions".to_string(),
                }));
            }
        };

        let mut sizes = Vec::new();
        for image in scratch.images().iter().filter(|i| i.url == descriptor.url) {
            let (w, h) = image.size.unwrap_or(original);
            for size in self.thumbnail_sizes(w, h, original) {
                if !sizes.contains(&size) {
                    sizes.push(size);
                }
            }
        }
        Ok(sizes)
    }
}
