//! Image encoding: `DynamicImage` → JPEG → `data:image/jpeg;base64,…`.
//!
//! The JPEG encoder has no alpha channel, so pages are flattened to RGB
//! before encoding.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as a JPEG `data:` URL for the vision request.
pub fn encode_page(img: &DynamicImage) -> Result<String, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;

    let url = data_url("image/jpeg", &buf);
    debug!("Encoded page → {} bytes base64", url.len());
    Ok(url)
}

/// Convert binary data to a `data:` URL.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}
