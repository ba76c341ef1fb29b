//! Reference image loading.

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use meshloop_core::message::EncodedImage;
use std::path::Path;

/// Media type from the file extension. Unknown extensions are sent as PNG.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// Read and base64-encode an image file.
pub fn load_image(path: &Path) -> anyhow::Result<EncodedImage> {
    let bytes =
        std::fs::read(path).with_context(|| format!("cannot read image {}", path.display()))?;
    if bytes.is_empty() {
        bail!("image {} is empty", path.display());
    }
    Ok(EncodedImage {
        media_type: media_type_for(path).to_string(),
        data: STANDARD.encode(&bytes),
    })
}
