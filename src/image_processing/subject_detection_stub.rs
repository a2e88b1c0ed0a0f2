/// Stand-in for the ONNX detector when the `ai` feature is disabled.
/// The loader always fails, so person cropping falls back to center.
use super::subject_detection::DetectorLoader;
use crate::config_file::DetectionConfig;

pub fn onnx_loader(_config: &DetectionConfig) -> DetectorLoader {
    Box::new(|| {
        Err(anyhow::anyhow!(
            "people detection requires building with the `ai` feature"
        ))
    })
}
