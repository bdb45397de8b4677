//! Reference text used to embed migrated objects into content.

use crate::upload::UploadDescriptor;

/// Build the markdown that re-embeds an object in migrated content.
///
/// Images become `![name|WxH](url)`, anything else an attachment link
/// followed by a human readable size.
pub fn reference_text(descriptor: &UploadDescriptor, display_name: &str) -> String {
    let name = sanitize_name(display_name);
    if descriptor.is_image() {
        match (descriptor.width, descriptor.height) {
            (Some(w), Some(h)) => format!("![{name}|{w}x{h}]({})", descriptor.url),
            _ => format!("![{name}]({})", descriptor.url),
        }
    } else {
        format!(
            "[{name}|attachment]({}) ({})",
            descriptor.url,
            human_size(descriptor.filesize)
        )
    }
}

/// Whether reference text embeds an image.
pub fn is_image_reference(text: &str) -> bool {
    text.trim_start().starts_with("![")
}

/// Format a byte count the way attachment links display it.
pub fn human_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} Bytes")
    }
}

// Brackets and pipes would break the link syntax.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '[' | ']' | '|' => '_',
            c => c,
        })
        .collect()
}
