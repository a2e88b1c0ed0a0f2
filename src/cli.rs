use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config_file::PipelineConfig;
use crate::image_processing::{CropStrategy, OutputFormat, ProcessingOptions, ResizeFit};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum FormatArg {
    #[value(name = "jpeg", alias = "jpg")]
    Jpeg,
    #[value(name = "png")]
    Png,
    #[value(name = "webp")]
    Webp,
    /// Keep the source format when possible
    #[value(name = "original")]
    Original,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Webp => OutputFormat::Webp,
            FormatArg::Original => OutputFormat::Original,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum CropArg {
    /// Centered aspect-matched crop
    #[value(name = "center")]
    Center,
    /// Crop anchored at --crop-left/--crop-top
    #[value(name = "custom")]
    Custom,
    /// Center the crop on the most confident detected person
    #[value(name = "person")]
    Person,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum FitArg {
    #[value(name = "cover")]
    Cover,
    #[value(name = "contain")]
    Contain,
    #[value(name = "fill")]
    Fill,
    #[value(name = "inside")]
    Inside,
    #[value(name = "outside")]
    Outside,
}

impl From<FitArg> for ResizeFit {
    fn from(arg: FitArg) -> Self {
        match arg {
            FitArg::Cover => ResizeFit::Cover,
            FitArg::Contain => ResizeFit::Contain,
            FitArg::Fill => ResizeFit::Fill,
            FitArg::Inside => ResizeFit::Inside,
            FitArg::Outside => ResizeFit::Outside,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "percen-processor",
    about = "Batch image reframing: crop, resize and re-encode photos per session",
    long_about = "
Percen Processor - batch image reframing

Crops every input image to the target aspect ratio (centered, at fixed
coordinates, or around the most prominent person), resizes it and re-encodes
it. Inputs are processed in memory-bounded batches; results are recorded per
session and written to <output>/metadata.jsonl.

Example Usage:
  # Default 640x800 JPEG, centered crop
  percen-processor -i ~/Photos -o ~/processed

  # Square WebP thumbnails cropped around people (requires the `ai` feature)
  percen-processor -i ~/Photos -o ~/processed -s 1080x1080 --format webp \\
    --crop person --model ./models/yolo11n.onnx

  # Fixed crop origin, PNG output, print signed download links
  percen-processor -i scan.png -o out --crop custom --crop-left 120 --crop-top 40 \\
    --format png --links

  # Validate and transform without writing anything
  percen-processor -i ~/Photos -o /tmp/unused --dry-run --verbose"
)]
pub struct Args {
    /// Input directories or single image files (can be specified multiple times)
    #[arg(short = 'i', long = "input", required = true, value_name = "DIR|FILE")]
    pub input_paths: Vec<PathBuf>,

    /// Output directory: processed objects and metadata.jsonl are written here
    #[arg(short = 'o', long = "output", value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Target size (format: WIDTHxHEIGHT, e.g., 640x800)
    #[arg(short = 's', long = "size", value_name = "WIDTHxHEIGHT")]
    pub size: Option<String>,

    /// Output format
    #[arg(short = 'f', long = "format")]
    pub format: Option<FormatArg>,

    /// Crop strategy applied before resizing
    #[arg(long = "crop")]
    pub crop: Option<CropArg>,

    /// Left edge of a custom crop in source pixels
    #[arg(long = "crop-left", value_name = "PX")]
    pub crop_left: Option<u32>,

    /// Top edge of a custom crop in source pixels
    #[arg(long = "crop-top", value_name = "PX")]
    pub crop_top: Option<u32>,

    /// How the image is fitted into the target size
    #[arg(long = "fit")]
    pub fit: Option<FitArg>,

    /// Encoding quality (1-100)
    #[arg(short = 'q', long = "quality", value_name = "1-100")]
    pub quality: Option<u8>,

    /// Session id to record results under (generated when omitted)
    #[arg(long = "session", value_name = "ID")]
    pub session: Option<String>,

    /// JSON pipeline configuration file; command-line flags take precedence
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// ONNX model used for --crop person
    #[arg(long = "model", value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Minimum person-detection confidence (0.0-1.0)
    #[arg(long = "confidence", value_name = "THRESHOLD")]
    pub confidence: Option<f32>,

    /// Byte budget per processing batch
    #[arg(long = "batch-capacity", value_name = "BYTES")]
    pub batch_capacity: Option<u64>,

    /// Number of parallel processing jobs (0 = auto-detect CPU cores)
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,

    /// Comma-separated list of image extensions to pick up from directories
    #[arg(long = "extensions", default_value = "jpg,jpeg,png,gif,webp,svg")]
    pub extensions_str: String,

    /// Enable verbose (debug) logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Emit JSON lines on stdout instead of human-readable output
    #[arg(long = "json-progress")]
    pub json_progress: bool,

    /// Print signed download links for the processed files
    #[arg(long = "links")]
    pub links: bool,

    /// Keep processed objects in memory and skip writing metadata
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

impl Args {
    /// Parse the size string into width and height
    pub fn parse_size(&self) -> Result<Option<(u32, u32)>, String> {
        let Some(size) = &self.size else {
            return Ok(None);
        };

        let parts: Vec<&str> = size.split(['x', 'X']).collect();
        if parts.len() != 2 {
            return Err(format!(
                "Invalid size format '{}'. Use WIDTHxHEIGHT (e.g., 640x800)",
                size
            ));
        }

        let width = parts[0]
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid width: '{}'", parts[0]))?;
        let height = parts[1]
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid height: '{}'", parts[1]))?;

        if width == 0 || height == 0 {
            return Err("Width and height must be greater than 0".to_string());
        }

        Ok(Some((width, height)))
    }

    /// Parse the extensions string into a vector
    pub fn parse_extensions(&self) -> Vec<String> {
        self.extensions_str
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn crop_strategy(&self) -> Option<CropStrategy> {
        let custom = CropStrategy::Custom {
            left: self.crop_left,
            top: self.crop_top,
        };
        match self.crop {
            Some(CropArg::Center) => Some(CropStrategy::Center),
            Some(CropArg::Person) => Some(CropStrategy::Person),
            Some(CropArg::Custom) => Some(custom),
            // Coordinates alone imply a custom crop
            None if self.crop_left.is_some() || self.crop_top.is_some() => Some(custom),
            None => None,
        }
    }

    /// Per-request options; unset flags fall back to configured defaults
    pub fn processing_options(&self) -> Result<ProcessingOptions, String> {
        let mut options = ProcessingOptions {
            output_format: self.format.map(Into::into),
            crop: self.crop_strategy(),
            fit: self.fit.map(Into::into),
            quality: self.quality,
            ..ProcessingOptions::default()
        };
        if let Some((width, height)) = self.parse_size()? {
            options = options.with_target(width, height);
        }
        Ok(options)
    }

    /// Apply command-line overrides on top of file/default configuration
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(model) = &self.model {
            config.detection.model_path = Some(model.clone());
        }
        if let Some(confidence) = self.confidence {
            config.detection.min_confidence = confidence;
        }
        if let Some(capacity) = self.batch_capacity {
            config.batch_capacity_bytes = capacity;
        }
        if let Some(jobs) = self.jobs {
            config.parallel_jobs = jobs;
        }
    }
}


// Default implementation for tests
#[cfg(test)]
impl Default for Args {
    fn default() -> Self {
        Self {
            input_paths: vec![],
            output_dir: PathBuf::new(),
            size: None,
            format: None,
            crop: None,
            crop_left: None,
            crop_top: None,
            fit: None,
            quality: None,
            session: None,
            config_file: None,
            model: None,
            confidence: None,
            batch_capacity: None,
            jobs: None,
            extensions_str: "jpg,png".to_string(),
            verbose: false,
            json_progress: false,
            links: false,
            dry_run: false,
        }
    }
}
