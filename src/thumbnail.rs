use crate::error::ThumbnailError;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::sync::Arc;

/// History thumbnails are stored inline as JPEG data URLs.
pub const THUMB_SIZE_DEFAULT: u32 = 384;
pub const THUMB_JPEG_QUALITY_DEFAULT: u8 = 85;
const THUMB_FILTER: FilterType = FilterType::Lanczos3;
pub const UNKNOWN_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailOptions {
    /// Longest edge in pixels. Smaller images are kept at their size.
    pub max_edge: u32,
    pub jpeg_quality: u8,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            max_edge: THUMB_SIZE_DEFAULT,
            jpeg_quality: THUMB_JPEG_QUALITY_DEFAULT,
        }
    }
}

/// Decodes `bytes`, downsizes and re-encodes them as a `data:image/jpeg` URL.
pub fn render_thumbnail_blocking(
    bytes: &[u8],
    options: ThumbnailOptions,
) -> Result<String, ThumbnailError> {
    let img = image::load_from_memory(bytes).map_err(ThumbnailError::Decode)?;
    let max_edge = options.max_edge.max(1);
    let thumbnail = if img.width() > max_edge || img.height() > max_edge {
        img.resize(max_edge, max_edge, THUMB_FILTER)
    } else {
        img
    };

    let rgb = thumbnail.to_rgb8();
    let mut encoded = Vec::with_capacity(64 * 1024);
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, options.jpeg_quality);
        encoder
            .encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(ThumbnailError::Encode)?;
    }

    Ok(format!(
        "data:image/jpeg;base64,{}",
        BASE64_STANDARD.encode(&encoded)
    ))
}

/// Renders a thumbnail on the blocking pool and awaits the result.
pub async fn render_thumbnail(
    bytes: Arc<[u8]>,
    options: ThumbnailOptions,
) -> Result<String, ThumbnailError> {
    tokio::task::spawn_blocking(move || render_thumbnail_blocking(&bytes, options))
        .await
        .map_err(|error| ThumbnailError::Join(error.to_string()))?
}

pub fn mime_from_image_bytes(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Gif) => "image/gif",
        _ => UNKNOWN_MIME,
    }
}
