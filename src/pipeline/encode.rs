//! Image encoding: page image file → base64 `ImageData` for the VLM request.
//!
//! Formats every vision provider accepts (PNG, JPEG, GIF, WebP) are sent
//! as-is: rasterised PDF pages are already lossless PNG, and a JPEG scan
//! would only grow when re-encoded. Anything else (TIFF, BMP) is decoded and
//! re-encoded as PNG. `detail: "high"` asks GPT-4-class models for the full
//! tile budget so fine print survives.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use std::io::{Cursor, Error, ErrorKind};
use std::path::Path;
use tracing::debug;

/// Image formats the supported providers take without conversion.
const PROVIDER_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

/// Read a page image and wrap it as base64 `ImageData`.
pub async fn encode_page(path: &Path) -> std::io::Result<ImageData> {
    let bytes = tokio::fs::read(path).await?;
    encode_bytes(&bytes)
}

/// Encode raw image bytes, sniffing the MIME type from the content.
///
/// Fails when a format outside [`PROVIDER_FORMATS`] cannot be decoded.
pub fn encode_bytes(bytes: &[u8]) -> std::io::Result<ImageData> {
    let (format, b64) = match image::guess_format(bytes) {
        Ok(format) if PROVIDER_FORMATS.contains(&format) => (format, STANDARD.encode(bytes)),
        Ok(format) => (ImageFormat::Png, STANDARD.encode(to_png(bytes, format)?)),
        Err(_) => (ImageFormat::Png, STANDARD.encode(bytes)),
    };
    let mime = format.to_mime_type();
    debug!("Encoded {} image → {} bytes base64", mime, b64.len());
    Ok(ImageData::new(b64, mime).with_detail("high"))
}

fn to_png(bytes: &[u8], format: ImageFormat) -> std::io::Result<Vec<u8>> {
    let invalid = |e: image::ImageError| Error::new(ErrorKind::InvalidData, e);
    let img = image::load_from_memory_with_format(bytes, format).map_err(invalid)?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(invalid)?;
    debug!("Converted {:?} page image to PNG", format);
    Ok(buf)
}
