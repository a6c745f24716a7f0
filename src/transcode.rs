use image::ImageFormat;

use crate::error::ApiError;

/// Convert an arbitrary still image into the normalized storage encoding
/// (WebP). Pure transform, no I/O, deterministic for a given input.
///
/// `quality` is validated to 0-100; the webp encoder in `image` is lossless,
/// so the value does not change the emitted bytes.
pub fn transcode_to_webp(bytes: &[u8], quality: u8) -> Result<Vec<u8>, ApiError> {
    if quality > 100 {
        return Err(ApiError::InvalidRequest(format!(
            "quality must be between 0 and 100, got {quality}"
        )));
    }
    if bytes.is_empty() {
        return Err(ApiError::UnsupportedInput("empty image payload".to_string()));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|err| ApiError::UnsupportedInput(format!("decode image failed: {err}")))?;

    let mut output = Vec::new();
    decoded
        .write_to(&mut std::io::Cursor::new(&mut output), ImageFormat::WebP)
        .map_err(|err| ApiError::UnsupportedInput(format!("encode webp failed: {err}")))?;
    Ok(output)
}

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }
    None
}
