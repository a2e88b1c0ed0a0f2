//! Crop rectangle geometry.
//!
//! All functions here are pure: they work on dimensions only, so the
//! strategies can be tested without decoding images.

use super::TargetSize;

/// Sub-rectangle of a source image, in source pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Center point of the rectangle
    pub fn center(&self) -> (f64, f64) {
        (
            self.left as f64 + self.width as f64 / 2.0,
            self.top as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn fits_within(&self, source: (u32, u32)) -> bool {
        self.left + self.width <= source.0 && self.top + self.height <= source.1
    }
}

/// Largest crop with the target aspect ratio that fits in the source.
///
/// If the source is wider than the target, the full height is kept and the
/// width is `floor(height * target_aspect)`; otherwise the full width is kept
/// and the height is `floor(width / target_aspect)`.
pub fn aspect_crop_size(source: (u32, u32), target: TargetSize) -> (u32, u32) {
    let (src_width, src_height) = source;
    let target_aspect = target.aspect();
    let source_aspect = src_width as f64 / src_height as f64;

    let (crop_width, crop_height) = if source_aspect > target_aspect {
        let width = (src_height as f64 * target_aspect).floor() as u32;
        (width, src_height)
    } else {
        let height = (src_width as f64 / target_aspect).floor() as u32;
        (src_width, height)
    };

    (
        crop_width.clamp(1, src_width.max(1)),
        crop_height.clamp(1, src_height.max(1)),
    )
}

/// Crop box of `size` centered in the source
pub fn center_crop(source: (u32, u32), size: (u32, u32)) -> CropRect {
    let (width, height) = clamp_size(source, size);
    CropRect {
        left: (source.0 - width) / 2,
        top: (source.1 - height) / 2,
        width,
        height,
    }
}

/// Crop box of `size` anchored at (`left`, `top`), pulled back inside the source
pub fn anchored_crop(source: (u32, u32), size: (u32, u32), left: u32, top: u32) -> CropRect {
    let (width, height) = clamp_size(source, size);
    CropRect {
        left: left.min(source.0 - width),
        top: top.min(source.1 - height),
        width,
        height,
    }
}

/// Crop box of `size` centered on `point`, then clamped to stay inside the source
pub fn centered_on(source: (u32, u32), size: (u32, u32), point: (f64, f64)) -> CropRect {
    let (width, height) = clamp_size(source, size);
    let ideal_left = (point.0 - width as f64 / 2.0).round();
    let ideal_top = (point.1 - height as f64 / 2.0).round();

    CropRect {
        left: ideal_left.clamp(0.0, (source.0 - width) as f64) as u32,
        top: ideal_top.clamp(0.0, (source.1 - height) as f64) as u32,
        width,
        height,
    }
}

fn clamp_size(source: (u32, u32), size: (u32, u32)) -> (u32, u32) {
    (size.0.min(source.0), size.1.min(source.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_source_portrait_target_is_height_bound() {
        // 1000x1000 into 640x800 (aspect 0.8): source aspect 1.0 > 0.8
        let size = aspect_crop_size((1000, 1000), TargetSize::new(640, 800));
        assert_eq!(size, (800, 1000));

        let rect = center_crop((1000, 1000), size);
        assert_eq!(
            rect,
            CropRect {
                left: 100,
                top: 0,
                width: 800,
                height: 1000
            }
        );
    }

    #[test]
    fn test_tall_source_landscape_target_is_width_bound() {
        let size = aspect_crop_size((600, 1200), TargetSize::new(800, 400));
        assert_eq!(size, (600, 300));

        let rect = center_crop((600, 1200), size);
        assert_eq!(rect.left, 0);
        assert_eq!(rect.top, 450);
    }

    #[test]
    fn test_crop_size_floors_fractional_edge() {
        // 1001 * (3/4) = 750.75 -> 750
        let size = aspect_crop_size((2000, 1001), TargetSize::new(300, 400));
        assert_eq!(size, (750, 1001));
    }

    #[test]
    fn test_crop_size_never_exceeds_source() {
        for (w, h) in [(1, 1), (1, 500), (500, 1), (333, 777)] {
            let (cw, ch) = aspect_crop_size((w, h), TargetSize::new(640, 800));
            assert!(cw >= 1 && cw <= w);
            assert!(ch >= 1 && ch <= h);
        }
    }

    #[test]
    fn test_anchored_crop_is_clamped_to_bounds() {
        let rect = anchored_crop((1000, 1000), (800, 1000), 50, 20);
        assert_eq!((rect.left, rect.top), (50, 0));

        let rect = anchored_crop((1000, 1000), (800, 1000), 900, 900);
        assert_eq!((rect.left, rect.top), (200, 0));
        assert!(rect.fits_within((1000, 1000)));
    }

    #[test]
    fn test_centered_on_point_inside_bounds() {
        let rect = centered_on((2000, 1000), (800, 1000), (700.0, 500.0));
        assert_eq!(rect.left, 300);
        assert_eq!(rect.center(), (700.0, 500.0));
        assert!((rect.aspect() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_centered_on_point_near_edges_is_clamped() {
        let rect = centered_on((2000, 1000), (800, 1000), (100.0, 500.0));
        assert_eq!(rect.left, 0);

        let rect = centered_on((2000, 1000), (800, 1000), (1990.0, 500.0));
        assert_eq!(rect.left, 1200);
        assert!(rect.fits_within((2000, 1000)));
    }
}
