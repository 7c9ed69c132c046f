//! Derivative generator: decodes an image and renders a bounded-size JPEG
//! thumbnail with the aspect ratio preserved.

use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView};

#[derive(Debug, thiserror::Error)]
pub enum ThumbError {
    /// Corrupt or unsupported input. Classified as a "skip" by the scanner,
    /// counted separately from I/O failures.
    #[error("undecodable image: {0}")]
    Undecodable(image::ImageError),
    /// Decode succeeded but JPEG encoding failed; the image is still
    /// indexed, just without a thumbnail. Carries the dimensions observed
    /// during decode so the document can still record them.
    #[error("jpeg encoding failed: {source}")]
    Encode {
        src_width: u32,
        src_height: u32,
        source: image::ImageError,
    },
}

/// A rendered thumbnail plus the source dimensions observed during decode.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub jpeg: Vec<u8>,
    pub src_width: u32,
    pub src_height: u32,
}

/// Decodes `bytes` and renders a JPEG whose long edge is capped at
/// `max_edge`. Images already within bounds are re-encoded without
/// upscaling.
pub fn render(bytes: &[u8], max_edge: u32, quality: u8) -> Result<Rendered, ThumbError> {
    let img = image::load_from_memory(bytes).map_err(ThumbError::Undecodable)?;
    let (src_width, src_height) = img.dimensions();

    let resized = resize_to_fit(img, max_edge);
    let jpeg = encode_jpeg(&resized, quality)
        .map_err(|source| ThumbError::Encode { src_width, src_height, source })?;
    Ok(Rendered { jpeg, src_width, src_height })
}

/// Scales down so the long edge fits `max_edge`; never upscales.
fn resize_to_fit(img: DynamicImage, max_edge: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let long_edge = width.max(height);
    if long_edge <= max_edge {
        return img;
    }
    let ratio = max_edge as f64 / long_edge as f64;
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);
    img.resize(new_width, new_height, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    // JPEG kennt kein Alpha; vorab nach RGB8 wandeln
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut buffer), quality);
    rgb.write_with_encoder(encoder)?;
    Ok(buffer)
}
