use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Formats the pipeline can write
pub fn is_encodable(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif
    )
}

/// File extension used for processed output names
pub fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        other => other.extensions_str().first().copied().unwrap_or("bin"),
    }
}

/// Encode an image in the given format.
///
/// `quality` (1-100) drives JPEG quality and PNG compression effort. The
/// WebP encoder is lossless, so quality does not apply there.
pub fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
        }
        ImageFormat::Png => {
            let compression = if quality >= 90 {
                CompressionType::Fast
            } else if quality >= 50 {
                CompressionType::Default
            } else {
                CompressionType::Best
            };
            let encoder = PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        ImageFormat::WebP => {
            let rgba = if img.color().has_alpha() {
                DynamicImage::ImageRgba8(img.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            let encoder = WebPEncoder::new_lossless(&mut buffer);
            rgba.write_with_encoder(encoder)?;
        }
        other => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_to(&mut Cursor::new(&mut buffer), other)?;
        }
    }

    Ok(buffer)
}
