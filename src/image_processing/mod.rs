pub mod batch;
pub mod crop;
pub mod encode;
pub mod orientation;
pub mod pipeline;
pub mod resize;
pub mod subject_detection;

#[cfg(feature = "ai")]
pub mod onnx_detection;
#[cfg(not(feature = "ai"))]
pub mod subject_detection_stub;

use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;

pub use batch::{fixed_chunks, partition, partition_or_chunk, Batch, ByteSized};
pub use crop::CropRect;
pub use pipeline::{EncodedImage, ImageMetadata, ImageTransformPipeline};
pub use subject_detection::{BoundingBox, Detection, DetectorLoader, PersonDetector, PersonLocator};

#[cfg(feature = "ai")]
pub use onnx_detection::onnx_loader;
#[cfg(not(feature = "ai"))]
pub use subject_detection_stub::onnx_loader;

/// Output encoding requested for processed images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    /// Keep the detected source format when it can be encoded
    Original,
}

impl OutputFormat {
    /// Resolve to a concrete encoder format.
    ///
    /// `Original` maps to the detected source format when it is one of the
    /// encodable formats, otherwise to `fallback`.
    pub fn resolve(self, source: ImageFormat, fallback: OutputFormat) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Webp => ImageFormat::WebP,
            OutputFormat::Original => {
                if encode::is_encodable(source) {
                    source
                } else {
                    fallback.resolve(source, OutputFormat::Jpeg)
                }
            }
        }
    }
}

/// How the image is fitted into the target frame during resize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFit {
    /// Fill the frame, cropping overflow (exact target size)
    #[default]
    Cover,
    /// Fit inside the frame and pad the remainder (exact target size)
    Contain,
    /// Stretch to the frame, ignoring aspect ratio (exact target size)
    Fill,
    /// Fit inside the frame, preserving aspect ratio
    Inside,
    /// Cover the frame, preserving aspect ratio without cropping
    Outside,
}

/// Crop policy applied before resizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum CropStrategy {
    Center,
    /// Anchor at caller-supplied coordinates; falls back to center unless both are given
    Custom { left: Option<u32>, top: Option<u32> },
    /// Center on the most confident detected person; falls back to center
    Person,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Configured fallbacks for anything a request leaves unset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformDefaults {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub format: OutputFormat,
    pub fit: ResizeFit,
}

impl Default for TransformDefaults {
    fn default() -> Self {
        Self {
            width: 640,
            height: 800,
            quality: 85,
            format: OutputFormat::Jpeg,
            fit: ResizeFit::Cover,
        }
    }
}

/// Allowed range for requested target dimensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SizeLimits {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            min_width: 100,
            max_width: 4000,
            min_height: 100,
            max_height: 4000,
        }
    }
}

/// Per-request processing options. Unset fields resolve to [`TransformDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingOptions {
    pub target: Option<TargetSize>,
    pub output_format: Option<OutputFormat>,
    pub crop: Option<CropStrategy>,
    pub fit: Option<ResizeFit>,
    pub quality: Option<u8>,
}

/// Options after defaults have been applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedOptions {
    pub target: TargetSize,
    pub output_format: OutputFormat,
    pub crop: Option<CropStrategy>,
    pub fit: ResizeFit,
    pub quality: u8,
}

impl ProcessingOptions {
    pub fn with_target(mut self, width: u32, height: u32) -> Self {
        self.target = Some(TargetSize::new(width, height));
        self
    }

    pub fn with_crop(mut self, crop: CropStrategy) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_fit(mut self, fit: ResizeFit) -> Self {
        self.fit = Some(fit);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Check requested dimensions and quality against the configured limits
    pub fn validate(&self, limits: &SizeLimits) -> Result<(), ProcessingError> {
        if let Some(target) = self.target {
            if !(limits.min_width..=limits.max_width).contains(&target.width) {
                return Err(ProcessingError::Validation(format!(
                    "Invalid width: must be between {} and {} pixels (received: {})",
                    limits.min_width, limits.max_width, target.width
                )));
            }
            if !(limits.min_height..=limits.max_height).contains(&target.height) {
                return Err(ProcessingError::Validation(format!(
                    "Invalid height: must be between {} and {} pixels (received: {})",
                    limits.min_height, limits.max_height, target.height
                )));
            }
        }

        if let Some(quality) = self.quality {
            if quality == 0 || quality > 100 {
                return Err(ProcessingError::Validation(format!(
                    "Invalid quality: must be between 1 and 100 (received: {})",
                    quality
                )));
            }
        }

        Ok(())
    }

    pub fn resolve(&self, defaults: &TransformDefaults) -> ResolvedOptions {
        ResolvedOptions {
            target: self
                .target
                .unwrap_or_else(|| TargetSize::new(defaults.width, defaults.height)),
            output_format: self.output_format.unwrap_or(defaults.format),
            crop: self.crop,
            fit: self.fit.unwrap_or(defaults.fit),
            quality: self.quality.unwrap_or(defaults.quality),
        }
    }
}

/// One uploaded image as received from the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub filename: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub bytes: Vec<u8>,
}

impl SourceItem {
    /// Build an item whose declared size matches its payload
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            byte_size: bytes.len() as u64,
            bytes,
        }
    }
}

impl ByteSized for SourceItem {
    fn byte_size(&self) -> u64 {
        self.byte_size
    }

    fn actual_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Completed,
    Error,
}

/// Outcome of processing one submitted item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResult {
    pub session_id: String,
    pub original_name: String,
    pub processed_key: Option<String>,
    pub processed_name: Option<String>,
    pub status: ItemStatus,
    pub error_message: Option<String>,
}

impl TransformResult {
    pub fn completed(
        session_id: &str,
        original_name: &str,
        processed_key: String,
        processed_name: String,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            original_name: original_name.to_string(),
            processed_key: Some(processed_key),
            processed_name: Some(processed_name),
            status: ItemStatus::Completed,
            error_message: None,
        }
    }

    pub fn failed(session_id: &str, original_name: &str, error: &ProcessingError) -> Self {
        Self {
            session_id: session_id.to_string(),
            original_name: original_name.to_string(),
            processed_key: None,
            processed_name: None,
            status: ItemStatus::Error,
            error_message: Some(error.to_string()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uses_defaults_when_unset() {
        let resolved = ProcessingOptions::default().resolve(&TransformDefaults::default());

        assert_eq!(resolved.target, TargetSize::new(640, 800));
        assert_eq!(resolved.output_format, OutputFormat::Jpeg);
        assert_eq!(resolved.fit, ResizeFit::Cover);
        assert_eq!(resolved.quality, 85);
        assert!(resolved.crop.is_none());
    }

    #[test]
    fn test_resolve_prefers_requested_values() {
        let options = ProcessingOptions::default()
            .with_target(300, 300)
            .with_format(OutputFormat::Png)
            .with_crop(CropStrategy::Person)
            .with_quality(60);
        let resolved = options.resolve(&TransformDefaults::default());

        assert_eq!(resolved.target, TargetSize::new(300, 300));
        assert_eq!(resolved.output_format, OutputFormat::Png);
        assert_eq!(resolved.crop, Some(CropStrategy::Person));
        assert_eq!(resolved.quality, 60);
    }

    #[test]
    fn test_validate_dimension_bounds() {
        let limits = SizeLimits::default();

        assert!(ProcessingOptions::default().validate(&limits).is_ok());
        assert!(ProcessingOptions::default()
            .with_target(100, 4000)
            .validate(&limits)
            .is_ok());

        let err = ProcessingOptions::default()
            .with_target(99, 500)
            .validate(&limits)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid width"));

        let err = ProcessingOptions::default()
            .with_target(500, 4001)
            .validate(&limits)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid height"));
    }

    #[test]
    fn test_validate_quality_range() {
        let limits = SizeLimits::default();
        assert!(ProcessingOptions::default().with_quality(0).validate(&limits).is_err());
        assert!(ProcessingOptions::default().with_quality(101).validate(&limits).is_err());
        assert!(ProcessingOptions::default().with_quality(100).validate(&limits).is_ok());
    }

    #[test]
    fn test_original_format_resolution() {
        assert_eq!(
            OutputFormat::Original.resolve(ImageFormat::Png, OutputFormat::Jpeg),
            ImageFormat::Png
        );
        assert_eq!(
            OutputFormat::Original.resolve(ImageFormat::Bmp, OutputFormat::Webp),
            ImageFormat::WebP
        );
        assert_eq!(
            OutputFormat::Jpeg.resolve(ImageFormat::Png, OutputFormat::Png),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_crop_strategy_serde_shape() {
        let json = serde_json::to_string(&CropStrategy::Custom {
            left: Some(10),
            top: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"strategy":"custom","left":10,"top":null}"#);

        let parsed: CropStrategy = serde_json::from_str(r#"{"strategy":"person"}"#).unwrap();
        assert_eq!(parsed, CropStrategy::Person);
    }

    #[test]
    fn test_failed_result_carries_message() {
        let err = ProcessingError::Validation("bad mime".to_string());
        let result = TransformResult::failed("s1", "a.gif", &err);

        assert_eq!(result.status, ItemStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("Validation failed: bad mime"));
        assert!(result.processed_key.is_none());
        assert!(!result.is_completed());
    }
}
