use exif::{In, Reader, Tag};
use image::DynamicImage;
use std::io::Cursor;

/// EXIF orientation values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExifOrientation {
    /// No orientation specified or undefined
    Undefined = 0,
    /// Normal orientation (0 degrees)
    TopLeft = 1,
    /// Horizontally flipped
    TopRight = 2,
    /// Rotated 180 degrees
    BottomRight = 3,
    /// Vertically flipped
    BottomLeft = 4,
    /// Rotated 90 degrees CCW + horizontally flipped
    LeftTop = 5,
    /// Rotated 90 degrees CW
    RightTop = 6,
    /// Rotated 90 degrees CW + horizontally flipped
    RightBottom = 7,
    /// Rotated 90 degrees CCW
    LeftBottom = 8,
}

impl From<u32> for ExifOrientation {
    fn from(value: u32) -> Self {
        match value {
            1 => ExifOrientation::TopLeft,
            2 => ExifOrientation::TopRight,
            3 => ExifOrientation::BottomRight,
            4 => ExifOrientation::BottomLeft,
            5 => ExifOrientation::LeftTop,
            6 => ExifOrientation::RightTop,
            7 => ExifOrientation::RightBottom,
            8 => ExifOrientation::LeftBottom,
            _ => ExifOrientation::Undefined,
        }
    }
}

impl ExifOrientation {
    /// Whether applying this orientation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(
            self,
            ExifOrientation::LeftTop
                | ExifOrientation::RightTop
                | ExifOrientation::RightBottom
                | ExifOrientation::LeftBottom
        )
    }

    /// Visual dimensions of an image stored as `width` x `height` with this orientation
    pub fn effective_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

/// Read the EXIF orientation tag from encoded image bytes.
///
/// Images without EXIF data (or with unreadable EXIF) report `Undefined`.
pub fn read_exif_orientation(bytes: &[u8]) -> ExifOrientation {
    let mut cursor = Cursor::new(bytes);
    let exif = match Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(_) => return ExifOrientation::Undefined,
    };

    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(ExifOrientation::from)
        .unwrap_or(ExifOrientation::Undefined)
}

/// Apply EXIF rotation to an image
///
/// Handles all 8 EXIF orientations with the matching combination of
/// rotations and flips.
pub fn apply_rotation(img: DynamicImage, orientation: ExifOrientation) -> DynamicImage {
    match orientation {
        ExifOrientation::Undefined | ExifOrientation::TopLeft => img,
        ExifOrientation::TopRight => img.fliph(),
        ExifOrientation::BottomRight => img.rotate180(),
        ExifOrientation::BottomLeft => img.flipv(),
        ExifOrientation::LeftTop => img.rotate90().fliph(),
        ExifOrientation::RightTop => img.rotate90(),
        ExifOrientation::RightBottom => img.rotate270().fliph(),
        ExifOrientation::LeftBottom => img.rotate270(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_exif_orientation_from_u32() {
        assert_eq!(ExifOrientation::from(1), ExifOrientation::TopLeft);
        assert_eq!(ExifOrientation::from(6), ExifOrientation::RightTop);
        assert_eq!(ExifOrientation::from(8), ExifOrientation::LeftBottom);
        assert_eq!(ExifOrientation::from(99), ExifOrientation::Undefined);
    }

    #[test]
    fn test_effective_dimensions() {
        assert_eq!(ExifOrientation::TopLeft.effective_dimensions(400, 300), (400, 300));
        assert_eq!(ExifOrientation::BottomRight.effective_dimensions(400, 300), (400, 300));
        assert_eq!(ExifOrientation::RightTop.effective_dimensions(400, 300), (300, 400));
        assert_eq!(ExifOrientation::LeftTop.effective_dimensions(400, 300), (300, 400));
    }

    #[test]
    fn test_apply_rotation_swaps_dimensions() {
        let img = create_test_image(40, 20);

        let rotated = apply_rotation(img.clone(), ExifOrientation::RightTop);
        assert_eq!((rotated.width(), rotated.height()), (20, 40));

        let flipped = apply_rotation(img.clone(), ExifOrientation::TopRight);
        assert_eq!((flipped.width(), flipped.height()), (40, 20));

        let untouched = apply_rotation(img, ExifOrientation::Undefined);
        assert_eq!((untouched.width(), untouched.height()), (40, 20));
    }

    #[test]
    fn test_rotate_90_cw_moves_top_left_pixel_to_top_right() {
        let img = create_test_image(3, 2);
        let original = *img.to_rgb8().get_pixel(0, 0);

        let rotated = apply_rotation(img, ExifOrientation::RightTop).to_rgb8();
        assert_eq!(rotated.get_pixel(1, 0), &original);
    }

    #[test]
    fn test_missing_exif_is_undefined() {
        assert_eq!(read_exif_orientation(b"not an image"), ExifOrientation::Undefined);

        let mut png = Vec::new();
        create_test_image(4, 4)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(read_exif_orientation(&png), ExifOrientation::Undefined);
    }
}
