//! Image payload helpers: content hashing and format sniffing.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Compute the content-addressed hash of raw image bytes.
///
/// Deterministic across runs and hosts; used for exact-duplicate detection.
/// Format: `sha256:<64 hex chars>`.
pub fn compute_image_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("sha256:{}", hex::encode(digest))
}

/// Map a short format hint ("jpg", "png", "image/webp") to a MIME type.
fn mime_from_hint(hint: &str) -> Option<&'static str> {
    let hint = hint.trim().to_ascii_lowercase();
    let ext = hint.strip_prefix("image/").unwrap_or(&hint);
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "heic" | "heif" => Some("image/heif"),
        "avif" => Some("image/avif"),
        _ => None,
    }
}

/// Validate an image payload and determine its MIME type.
///
/// Magic bytes win over the caller's hint. Payloads whose magic bytes identify
/// a non-image format are rejected; payloads without recognizable magic bytes
/// fall back to the hint.
pub fn detect_image_mime(data: &[u8], format_hint: Option<&str>) -> Result<String> {
    if data.is_empty() {
        return Err(Error::InvalidInput("image payload is empty".to_string()));
    }

    if let Some(kind) = infer::get(data) {
        let mime = kind.mime_type();
        if mime.starts_with("image/") {
            return Ok(mime.to_string());
        }
        return Err(Error::InvalidInput(format!(
            "payload is {} rather than an image",
            mime
        )));
    }

    match format_hint.and_then(mime_from_hint) {
        Some(mime) => Ok(mime.to_string()),
        None => Err(Error::InvalidInput(
            "unrecognized image format and no usable format hint".to_string(),
        )),
    }
}
