use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::image_processing::{SizeLimits, TransformDefaults};
use crate::storage::StorageEnv;

pub const DEFAULT_BATCH_CAPACITY_BYTES: u64 = 8 * 1024 * 1024;
/// Hard per-file cap; files between the batch capacity and this get a batch of their own
pub const DEFAULT_MAX_ITEM_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_FALLBACK_CHUNK_SIZE: usize = 3;
pub const DEFAULT_MAX_FILES: usize = 100;

/// People-detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// ONNX model file; detection is unavailable without one
    pub model_path: Option<PathBuf>,
    pub min_confidence: f32,
    pub timeout_ms: u64,
    pub iou_threshold: f32,
    /// Square model input edge in pixels
    pub input_size: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            min_confidence: 0.5,
            timeout_ms: 10_000,
            iou_threshold: 0.45,
            input_size: 640,
        }
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Pipeline configuration, as stored in the JSON config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub batch_capacity_bytes: u64,
    pub fallback_chunk_size: usize,
    pub max_files: usize,
    pub max_item_bytes: u64,
    pub allowed_mime_types: Vec<String>,
    pub defaults: TransformDefaults,
    pub limits: SizeLimits,
    pub detection: DetectionConfig,
    /// Worker threads; 0 uses every CPU
    pub parallel_jobs: usize,
    /// Evict ledger sessions idle this long; unset keeps them until flushed
    pub session_idle_ttl_secs: Option<u64>,
    /// Key prefix environment; unset reads `APP_ENV`
    pub storage_env: Option<StorageEnv>,
    pub signed_url_ttl_secs: u64,
    pub url_signing_secret: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_capacity_bytes: DEFAULT_BATCH_CAPACITY_BYTES,
            fallback_chunk_size: DEFAULT_FALLBACK_CHUNK_SIZE,
            max_files: DEFAULT_MAX_FILES,
            max_item_bytes: DEFAULT_MAX_ITEM_BYTES,
            allowed_mime_types: [
                "image/jpeg",
                "image/jpg",
                "image/png",
                "image/gif",
                "image/webp",
                "image/svg+xml",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            defaults: TransformDefaults::default(),
            limits: SizeLimits::default(),
            detection: DetectionConfig::default(),
            parallel_jobs: 0,
            session_idle_ttl_secs: None,
            storage_env: None,
            signed_url_ttl_secs: 3600,
            url_signing_secret: "local-dev-secret".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: PipelineConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_capacity_bytes == 0 {
            anyhow::bail!("batchCapacityBytes must be greater than zero");
        }
        if self.max_files == 0 {
            anyhow::bail!("maxFiles must be greater than zero");
        }
        if self.max_item_bytes == 0 {
            anyhow::bail!("maxItemBytes must be greater than zero");
        }

        let limits = &self.limits;
        if limits.min_width == 0 || limits.min_height == 0 {
            anyhow::bail!("Size limits must be at least 1 pixel");
        }
        if limits.min_width > limits.max_width || limits.min_height > limits.max_height {
            anyhow::bail!(
                "Size limits are inverted: width {}..{}, height {}..{}",
                limits.min_width,
                limits.max_width,
                limits.min_height,
                limits.max_height
            );
        }

        let defaults = &self.defaults;
        if !(limits.min_width..=limits.max_width).contains(&defaults.width)
            || !(limits.min_height..=limits.max_height).contains(&defaults.height)
        {
            anyhow::bail!(
                "Default size {}x{} is outside the configured limits",
                defaults.width,
                defaults.height
            );
        }
        if defaults.quality == 0 || defaults.quality > 100 {
            anyhow::bail!("Default quality must be between 1 and 100");
        }

        let detection = &self.detection;
        if !(0.0..=1.0).contains(&detection.min_confidence) {
            anyhow::bail!(
                "Detection confidence must be between 0.0 and 1.0 (got {})",
                detection.min_confidence
            );
        }
        if !(0.0..=1.0).contains(&detection.iou_threshold) {
            anyhow::bail!("Detection IoU threshold must be between 0.0 and 1.0");
        }
        if detection.input_size == 0 {
            anyhow::bail!("Detection input size must be greater than zero");
        }

        Ok(())
    }

    pub fn storage_env(&self) -> StorageEnv {
        self.storage_env.unwrap_or_else(StorageEnv::from_env)
    }

    pub fn session_idle_ttl(&self) -> Option<Duration> {
        self.session_idle_ttl_secs.map(Duration::from_secs)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn is_mime_allowed(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::OutputFormat;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_capacity_bytes, 8 * 1024 * 1024);
        assert_eq!(config.fallback_chunk_size, 3);
        assert_eq!(config.max_files, 100);
        assert_eq!(config.detection.timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.json");
        fs::write(
            &path,
            r#"{
                "maxFiles": 10,
                "defaults": { "width": 1024, "format": "webp" },
                "detection": { "minConfidence": 0.7 },
                "storageEnv": "prod",
                "sessionIdleTtlSecs": 900
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.max_files, 10);
        assert_eq!(config.defaults.width, 1024);
        assert_eq!(config.defaults.height, 800);
        assert_eq!(config.defaults.format, OutputFormat::Webp);
        assert_eq!(config.detection.min_confidence, 0.7);
        assert_eq!(config.detection.input_size, 640);
        assert_eq!(config.storage_env(), StorageEnv::Prod);
        assert_eq!(config.session_idle_ttl(), Some(Duration::from_secs(900)));
        assert_eq!(config.batch_capacity_bytes, DEFAULT_BATCH_CAPACITY_BYTES);
        assert!(config.max_item_bytes > config.batch_capacity_bytes);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let mut config = PipelineConfig::default();
        config.parallel_jobs = 4;
        config.detection.model_path = Some(PathBuf::from("/models/yolo.onnx"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"parallelJobs\":4"));
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
        assert!(PipelineConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_settings() {
        let mut config = PipelineConfig::default();
        config.batch_capacity_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.limits.min_width = 5000;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.detection.min_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.defaults.width = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mime_allow_list_is_case_insensitive() {
        let config = PipelineConfig::default();
        assert!(config.is_mime_allowed("image/JPEG"));
        assert!(config.is_mime_allowed("image/svg+xml"));
        assert!(!config.is_mime_allowed("image/bmp"));
        assert!(!config.is_mime_allowed("application/pdf"));
    }
}
