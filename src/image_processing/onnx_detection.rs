//! YOLO-style person detector running on ONNX Runtime.
//!
//! The model is loaded from disk on first use through [`onnx_loader`]; the
//! [`PersonLocator`](super::PersonLocator) caches the result.
use anyhow::{Context, Result};
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::subject_detection::{BoundingBox, Detection, DetectorLoader, PersonDetector};
use crate::config_file::DetectionConfig;

/// Candidate box in model input space (center format)
#[derive(Debug, Clone, Copy)]
struct RawBox {
    cx: f32,
    cy: f32,
    width: f32,
    height: f32,
    confidence: f32,
    class_id: usize,
}

/// ONNX people detector. Inference needs `&mut Session`, hence the mutex.
pub struct OnnxPersonDetector {
    session: Mutex<Session>,
    input_size: u32,
    score_threshold: f32,
    iou_threshold: f32,
}

impl OnnxPersonDetector {
    pub fn load(model_path: &Path, input_size: u32, score_threshold: f32, iou_threshold: f32) -> Result<Self> {
        let _ = ort::init();

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load detection model {}", model_path.display()))?;

        info!(model = %model_path.display(), input_size, "Loaded ONNX detection model");

        Ok(Self {
            session: Mutex::new(session),
            input_size,
            score_threshold,
            iou_threshold,
        })
    }
}

impl PersonDetector for OnnxPersonDetector {
    fn detect(&self, img: &RgbImage) -> Result<Vec<Detection>> {
        let size = self.input_size;
        let (orig_width, orig_height) = img.dimensions();

        let detections = {
            let resized = image::imageops::resize(img, size, size, image::imageops::FilterType::CatmullRom);
            let tensor_data = prepare_tensor(&resized);
            drop(resized);

            let input_value = Value::from_array((vec![1usize, 3, size as usize, size as usize], tensor_data))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow::anyhow!("Detection session lock poisoned"))?;
            let outputs = session.run(ort::inputs!["images" => input_value])?;

            let (output_shape, output_data) = outputs["output0"].try_extract_tensor::<f32>()?;
            let shape: Vec<usize> = output_shape.iter().map(|&x| x as usize).collect();

            process_yolo_output(output_data, &shape, self.score_threshold, self.iou_threshold)?
        };

        let scale_x = orig_width as f32 / size as f32;
        let scale_y = orig_height as f32 / size as f32;
        debug!(count = detections.len(), "Raw detections after NMS");

        Ok(detections
            .into_iter()
            .map(|raw| to_source_space(raw, scale_x, scale_y, orig_width, orig_height))
            .collect())
    }
}

/// Loader for [`PersonLocator::new`](super::PersonLocator::new) built from configuration
pub fn onnx_loader(config: &DetectionConfig) -> DetectorLoader {
    let model_path: Option<PathBuf> = config.model_path.clone();
    let input_size = config.input_size;
    // Keep low-confidence candidates; the locator applies the caller's threshold.
    let score_threshold = (config.min_confidence * 0.5).max(0.05);
    let iou_threshold = config.iou_threshold;

    Box::new(move || {
        let path = model_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No detection model configured"))?;
        let detector = OnnxPersonDetector::load(path, input_size, score_threshold, iou_threshold)?;
        Ok(Arc::new(detector) as Arc<dyn PersonDetector>)
    })
}

/// Convert a center-format model box to a corner-format box in source pixels
fn to_source_space(raw: RawBox, scale_x: f32, scale_y: f32, width: u32, height: u32) -> Detection {
    let x_min = ((raw.cx - raw.width / 2.0) * scale_x).clamp(0.0, width as f32);
    let y_min = ((raw.cy - raw.height / 2.0) * scale_y).clamp(0.0, height as f32);
    let x_max = ((raw.cx + raw.width / 2.0) * scale_x).clamp(0.0, width as f32);
    let y_max = ((raw.cy + raw.height / 2.0) * scale_y).clamp(0.0, height as f32);

    Detection {
        class_id: raw.class_id,
        bbox: BoundingBox {
            x: x_min,
            y: y_min,
            width: x_max - x_min,
            height: y_max - y_min,
            confidence: raw.confidence,
        },
    }
}

/// NCHW float tensor in [0, 1]
fn prepare_tensor(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut tensor_data = Vec::with_capacity(3 * (width * height) as usize);

    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                tensor_data.push(img.get_pixel(x, y)[c] as f32 / 255.0);
            }
        }
    }

    tensor_data
}

/// Decode a `[1, 4 + classes, predictions]` YOLO output and apply NMS
fn process_yolo_output(
    output_data: &[f32],
    shape: &[usize],
    score_threshold: f32,
    iou_threshold: f32,
) -> Result<Vec<RawBox>> {
    let (features, predictions) = match shape {
        [1, features, predictions] if *features > 4 => (*features, *predictions),
        _ => anyhow::bail!("Unexpected detection output shape {:?}", shape),
    };
    if output_data.len() < features * predictions {
        anyhow::bail!(
            "Detection output has {} values, expected {}",
            output_data.len(),
            features * predictions
        );
    }

    let mut candidates = Vec::new();
    for i in 0..predictions {
        // Output is feature-major: value j of prediction i lives at j * predictions + i
        let at = |j: usize| output_data[j * predictions + i];

        let best_class = (4..features)
            .map(|j| (j - 4, at(j)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((class_id, confidence)) = best_class {
            if confidence > score_threshold {
                candidates.push(RawBox {
                    cx: at(0),
                    cy: at(1),
                    width: at(2),
                    height: at(3),
                    confidence,
                    class_id,
                });
            }
        }
    }

    Ok(non_maximum_suppression(candidates, iou_threshold))
}

/// Class-aware non-maximum suppression
fn non_maximum_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawBox> = Vec::new();
    for candidate in boxes {
        let suppressed = keep
            .iter()
            .any(|kept| kept.class_id == candidate.class_id && iou(kept, &candidate) >= iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }

    keep
}

/// Intersection over union of two center-format boxes
fn iou(a: &RawBox, b: &RawBox) -> f32 {
    let inter_x1 = (a.cx - a.width / 2.0).max(b.cx - b.width / 2.0);
    let inter_y1 = (a.cy - a.height / 2.0).max(b.cy - b.height / 2.0);
    let inter_x2 = (a.cx + a.width / 2.0).min(b.cx + b.width / 2.0);
    let inter_y2 = (a.cy + a.height / 2.0).min(b.cy + b.height / 2.0);

    if inter_x2 <= inter_x1 || inter_y2 <= inter_y1 {
        return 0.0;
    }

    let inter_area = (inter_x2 - inter_x1) * (inter_y2 - inter_y1);
    let union_area = a.width * a.height + b.width * b.height - inter_area;
    if union_area <= 0.0 {
        0.0
    } else {
        inter_area / union_area
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(cx: f32, cy: f32, confidence: f32, class_id: usize) -> RawBox {
        RawBox {
            cx,
            cy,
            width: 100.0,
            height: 100.0,
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_iou() {
        let a = raw(50.0, 50.0, 0.9, 0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &raw(500.0, 500.0, 0.9, 0)), 0.0);

        // Half overlap horizontally: 50*100 / (2*10000 - 5000)
        let half = iou(&a, &raw(100.0, 50.0, 0.9, 0));
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_is_class_aware() {
        let boxes = vec![
            raw(50.0, 50.0, 0.8, 0),
            raw(52.0, 50.0, 0.9, 0),
            raw(50.0, 50.0, 0.7, 1),
        ];
        let kept = non_maximum_suppression(boxes, 0.45);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
    }

    #[test]
    fn test_process_output_picks_best_class() {
        // 2 predictions, 4 box values + 2 classes, feature-major
        let predictions = 2;
        let mut data = vec![0.0f32; 6 * predictions];
        let mut set = |feature: usize, pred: usize, v: f32| data[feature * predictions + pred] = v;
        set(0, 0, 320.0);
        set(1, 0, 320.0);
        set(2, 0, 64.0);
        set(3, 0, 128.0);
        set(4, 0, 0.85);
        set(5, 0, 0.10);
        set(4, 1, 0.01);
        set(5, 1, 0.02);

        let boxes = process_yolo_output(&data, &[1, 6, predictions], 0.25, 0.45).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 0);
        assert_eq!(boxes[0].width, 64.0);
    }

    #[test]
    fn test_process_output_rejects_bad_shape() {
        assert!(process_yolo_output(&[0.0; 8], &[1, 4, 2], 0.25, 0.45).is_err());
        assert!(process_yolo_output(&[0.0; 8], &[1, 84, 8400], 0.25, 0.45).is_err());
    }

    #[test]
    fn test_to_source_space_scales_and_clamps() {
        let det = to_source_space(raw(10.0, 320.0, 0.9, 0), 2.0, 1.5, 1280, 960);
        assert_eq!(det.bbox.x, 0.0);
        assert_eq!(det.bbox.y, 405.0);
        assert_eq!(det.bbox.width, 120.0);
        assert_eq!(det.bbox.height, 150.0);
    }

    #[test]
    fn test_prepare_tensor_is_channel_major() {
        let img = RgbImage::from_pixel(2, 2, image::Rgb([255, 0, 51]));
        let tensor = prepare_tensor(&img);
        assert_eq!(tensor.len(), 12);
        assert_eq!(tensor[0], 1.0);
        assert_eq!(tensor[4], 0.0);
        assert!((tensor[8] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_loader_without_model_path_fails() {
        let config = DetectionConfig {
            model_path: None,
            ..DetectionConfig::default()
        };
        assert!(onnx_loader(&config)().is_err());
    }
}
