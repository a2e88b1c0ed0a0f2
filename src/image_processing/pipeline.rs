use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

use super::crop::{self, CropRect};
use super::orientation::{self, ExifOrientation};
use super::subject_detection::PersonLocator;
use super::{encode, resize, CropStrategy, ProcessingOptions, TargetSize, TransformDefaults};
use crate::error::ProcessingError;

/// Header-level facts about an encoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Visual width, after EXIF orientation
    pub width: u32,
    /// Visual height, after EXIF orientation
    pub height: u32,
    pub format: ImageFormat,
    pub orientation: ExifOrientation,
}

/// Output of a successful transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        encode::extension_for(self.format)
    }
}

/// Crop, resize and re-encode one image.
///
/// The pipeline is stateless apart from its configuration and an optional
/// shared [`PersonLocator`], so one instance can serve many threads.
pub struct ImageTransformPipeline {
    defaults: TransformDefaults,
    locator: Option<Arc<PersonLocator>>,
    min_confidence: f32,
}

impl ImageTransformPipeline {
    pub fn new(defaults: TransformDefaults) -> Self {
        Self {
            defaults,
            locator: None,
            min_confidence: 0.5,
        }
    }

    /// Enable person-aware cropping
    pub fn with_locator(mut self, locator: Arc<PersonLocator>, min_confidence: f32) -> Self {
        self.locator = Some(locator);
        self.min_confidence = min_confidence;
        self
    }

    pub fn defaults(&self) -> &TransformDefaults {
        &self.defaults
    }

    /// Read format and dimensions without decoding pixel data
    pub fn read_metadata(&self, bytes: &[u8]) -> Result<ImageMetadata, ProcessingError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(ProcessingError::decode)?;
        let format = reader
            .format()
            .ok_or_else(|| ProcessingError::Decode("Unrecognized image format".to_string()))?;
        let (width, height) = reader.into_dimensions().map_err(ProcessingError::decode)?;

        let orientation = orientation::read_exif_orientation(bytes);
        let (width, height) = orientation.effective_dimensions(width, height);

        Ok(ImageMetadata {
            width,
            height,
            format,
            orientation,
        })
    }

    /// Decode, optionally crop, resize and encode
    pub fn transform(
        &self,
        bytes: &[u8],
        options: &ProcessingOptions,
    ) -> Result<EncodedImage, ProcessingError> {
        let resolved = options.resolve(&self.defaults);

        let (img, source_format) = decode_oriented(bytes)?;

        let img = match resolved.crop {
            Some(strategy) => {
                let rect = self.crop_rect(&img, strategy, resolved.target);
                debug!(?strategy, ?rect, "Cropping");
                img.crop_imm(rect.left, rect.top, rect.width, rect.height)
            }
            None => img,
        };

        let resized = resize::resize_to_fit(&img, resolved.target, resolved.fit)
            .map_err(ProcessingError::transform)?;
        drop(img);

        let format = self.output_format(options, source_format);
        let encoded = encode::encode(&resized, format, resolved.quality)
            .map_err(ProcessingError::transform)?;

        Ok(EncodedImage {
            bytes: encoded,
            format,
            width: resized.width(),
            height: resized.height(),
        })
    }

    /// Encoding a source of `source_format` will produce under `options`
    pub fn output_format(&self, options: &ProcessingOptions, source_format: ImageFormat) -> ImageFormat {
        options
            .resolve(&self.defaults)
            .output_format
            .resolve(source_format, self.defaults.format)
    }

    /// Aspect-matched crop box for `strategy`.
    ///
    /// Every strategy ends up somewhere valid: custom crops without both
    /// coordinates and person crops without a detection use the center.
    pub fn crop_rect(&self, img: &DynamicImage, strategy: CropStrategy, target: TargetSize) -> CropRect {
        let source = (img.width(), img.height());
        let size = crop::aspect_crop_size(source, target);

        match strategy {
            CropStrategy::Center => crop::center_crop(source, size),
            CropStrategy::Custom {
                left: Some(left),
                top: Some(top),
            } => crop::anchored_crop(source, size, left, top),
            CropStrategy::Custom { .. } => crop::center_crop(source, size),
            CropStrategy::Person => {
                let person = self
                    .locator
                    .as_ref()
                    .and_then(|locator| locator.locate(img, self.min_confidence));

                match person {
                    Some(bbox) => crop::centered_on(source, size, bbox.center()),
                    None => {
                        debug!("No person found, using center crop");
                        crop::center_crop(source, size)
                    }
                }
            }
        }
    }
}

fn decode_oriented(bytes: &[u8]) -> Result<(DynamicImage, ImageFormat), ProcessingError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ProcessingError::decode)?;
    let format = reader
        .format()
        .ok_or_else(|| ProcessingError::Decode("Unrecognized image format".to_string()))?;
    let img = reader.decode().map_err(ProcessingError::decode)?;

    let img = orientation::apply_rotation(img, orientation::read_exif_orientation(bytes));
    Ok((img, format))
}
