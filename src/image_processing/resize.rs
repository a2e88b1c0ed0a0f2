use anyhow::Result;
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{imageops, DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

use super::crop::{aspect_crop_size, center_crop};
use super::{ResizeFit, TargetSize};

/// Resize an image into the target frame using the given fit policy.
///
/// `Cover`, `Contain` and `Fill` always produce exactly `target`; `Inside`
/// and `Outside` preserve the aspect ratio and only touch the frame.
pub fn resize_to_fit(img: &DynamicImage, target: TargetSize, fit: ResizeFit) -> Result<DynamicImage> {
    let source = (img.width(), img.height());

    match fit {
        ResizeFit::Cover => {
            let rect = center_crop(source, aspect_crop_size(source, target));
            let cropped = img.crop_imm(rect.left, rect.top, rect.width, rect.height);
            resize_exact(&cropped, target.width, target.height)
        }
        ResizeFit::Fill => resize_exact(img, target.width, target.height),
        ResizeFit::Inside => {
            let (width, height) = fit_inside(source, target);
            resize_exact(img, width, height)
        }
        ResizeFit::Outside => {
            let (width, height) = fit_outside(source, target);
            resize_exact(img, width, height)
        }
        ResizeFit::Contain => {
            let (width, height) = fit_inside(source, target);
            let resized = resize_exact(img, width, height)?;
            let x = ((target.width - width) / 2) as i64;
            let y = ((target.height - height) / 2) as i64;

            // Transparent padding where the format can carry it, black otherwise
            if img.color().has_alpha() {
                let mut canvas =
                    RgbaImage::from_pixel(target.width, target.height, Rgba([0, 0, 0, 0]));
                imageops::overlay(&mut canvas, &resized.to_rgba8(), x, y);
                Ok(DynamicImage::ImageRgba8(canvas))
            } else {
                let mut canvas = RgbImage::from_pixel(target.width, target.height, Rgb([0, 0, 0]));
                imageops::overlay(&mut canvas, &resized.to_rgb8(), x, y);
                Ok(DynamicImage::ImageRgb8(canvas))
            }
        }
    }
}

/// Largest size with the source aspect ratio that fits inside the target
pub fn fit_inside(source: (u32, u32), target: TargetSize) -> (u32, u32) {
    let scale_x = target.width as f64 / source.0 as f64;
    let scale_y = target.height as f64 / source.1 as f64;
    let scale = scale_x.min(scale_y);

    (
        scaled(source.0, scale).min(target.width),
        scaled(source.1, scale).min(target.height),
    )
}

/// Smallest size with the source aspect ratio that covers the target
pub fn fit_outside(source: (u32, u32), target: TargetSize) -> (u32, u32) {
    let scale_x = target.width as f64 / source.0 as f64;
    let scale_y = target.height as f64 / source.1 as f64;
    let scale = scale_x.max(scale_y);

    (
        scaled(source.0, scale).max(target.width),
        scaled(source.1, scale).max(target.height),
    )
}

fn scaled(value: u32, scale: f64) -> u32 {
    ((value as f64 * scale).round() as u32).max(1)
}

/// Resize an image to exact dimensions using high-quality algorithm
pub fn resize_exact(img: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage> {
    let (src_width, src_height) = (img.width(), img.height());

    if src_width == 0 || src_height == 0 {
        return Err(anyhow::anyhow!("Source image has zero size"));
    }
    if width == 0 || height == 0 {
        return Err(anyhow::anyhow!("Target size {}x{} has a zero edge", width, height));
    }

    if src_width == width && src_height == height {
        return Ok(img.clone());
    }

    let has_alpha = img.color().has_alpha();
    let (pixel_type, src_pixels) = if has_alpha {
        (PixelType::U8x4, img.to_rgba8().into_raw())
    } else {
        (PixelType::U8x3, img.to_rgb8().into_raw())
    };

    let src_image = Image::from_vec_u8(src_width, src_height, src_pixels, pixel_type)?;
    let mut dst_image = Image::new(width, height, pixel_type);

    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
    let mut resizer = Resizer::new();
    resizer.resize(&src_image, &mut dst_image, Some(&options))?;

    let dst_pixels = dst_image.into_vec();
    let output = if has_alpha {
        RgbaImage::from_raw(width, height, dst_pixels).map(DynamicImage::ImageRgba8)
    } else {
        RgbImage::from_raw(width, height, dst_pixels).map(DynamicImage::ImageRgb8)
    };

    output.ok_or_else(|| anyhow::anyhow!("Resized buffer does not match {}x{}", width, height))
}
