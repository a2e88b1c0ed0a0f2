//! Person detection for subject-aware cropping.
//!
//! [`PersonLocator`] owns one lazily-loaded [`PersonDetector`] and answers
//! "where is the most confident person?" with an `Option`. Detection is a
//! best-effort enhancement: a detector that cannot load, errors out or runs
//! past its timeout yields `None`, and callers fall back to center cropping.

use anyhow::Result;
use image::{DynamicImage, RgbImage};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::orientation;

/// COCO class id for "person"
pub const PERSON_CLASS_ID: usize = 0;

/// Detected region of interest in source pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// Raw model output: one box with its class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub bbox: BoundingBox,
}

/// An object-detection model
pub trait PersonDetector: Send + Sync {
    /// Run inference on an RGB image, returning boxes in the image's own coordinates
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;
}

/// Builds the detector on first use
pub type DetectorLoader = Box<dyn Fn() -> Result<Arc<dyn PersonDetector>> + Send + Sync>;

/// Lazily-initialized, shared person locator
pub struct PersonLocator {
    loader: DetectorLoader,
    detector: OnceLock<Option<Arc<dyn PersonDetector>>>,
    timeout: Option<Duration>,
    /// Timed-out inferences still running on their helper threads
    abandoned: Arc<AtomicUsize>,
}

const CALL_RUNNING: u8 = 0;
const CALL_DONE: u8 = 1;
const CALL_ABANDONED: u8 = 2;

impl PersonLocator {
    pub fn new(loader: DetectorLoader) -> Self {
        Self {
            loader,
            detector: OnceLock::new(),
            timeout: None,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Locator around an already-loaded detector
    pub fn with_detector(detector: Arc<dyn PersonDetector>) -> Self {
        Self::new(Box::new(move || Ok(Arc::clone(&detector))))
    }

    /// Locator that never finds anyone
    pub fn unavailable() -> Self {
        Self::new(Box::new(|| Err(anyhow::anyhow!("people detection is disabled"))))
    }

    /// Bound each inference call; a call running longer yields `None`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Detector instance, loading it on first call.
    ///
    /// Concurrent first callers block on a single load. A failed load is
    /// remembered, so later calls return `None` without retrying.
    fn detector(&self) -> Option<Arc<dyn PersonDetector>> {
        self.detector
            .get_or_init(|| match (self.loader)() {
                Ok(detector) => {
                    info!("People detection model loaded");
                    Some(detector)
                }
                Err(e) => {
                    warn!("People detection unavailable, falling back to center crop: {:#}", e);
                    None
                }
            })
            .clone()
    }

    /// Whether a detector is loaded (triggers the load)
    pub fn is_available(&self) -> bool {
        self.detector().is_some()
    }

    /// Highest-confidence person with confidence >= `min_confidence`
    pub fn locate(&self, image: &DynamicImage, min_confidence: f32) -> Option<BoundingBox> {
        let detector = self.detector()?;
        let rgb = image.to_rgb8();

        let detections = match self.timeout {
            None => detector.detect(&rgb),
            Some(timeout) => {
                if self.abandoned.load(Ordering::Acquire) > 0 {
                    debug!("Previous detection still running, skipping");
                    return None;
                }
                match self.run_with_timeout(detector, rgb, timeout) {
                    Some(result) => result,
                    None => {
                        warn!(timeout_ms = timeout.as_millis() as u64, "People detection timed out");
                        return None;
                    }
                }
            }
        };

        match detections {
            Ok(detections) => best_person(&detections, min_confidence),
            Err(e) => {
                warn!("People detection failed: {:#}", e);
                None
            }
        }
    }

    /// Run inference on a helper thread and wait at most `timeout`.
    ///
    /// An abandoned inference finishes in the background and its result is
    /// discarded. Until it does, `locate` skips detection instead of piling
    /// more threads behind it.
    fn run_with_timeout(
        &self,
        detector: Arc<dyn PersonDetector>,
        image: RgbImage,
        timeout: Duration,
    ) -> Option<Result<Vec<Detection>>> {
        let (tx, rx) = mpsc::sync_channel(1);
        let state = Arc::new(AtomicU8::new(CALL_RUNNING));

        let helper_state = Arc::clone(&state);
        let abandoned = Arc::clone(&self.abandoned);
        let spawned = std::thread::Builder::new()
            .name("people-detection".to_string())
            .spawn(move || {
                let result = detector.detect(&image);
                drop(image);
                if helper_state.swap(CALL_DONE, Ordering::AcqRel) == CALL_ABANDONED {
                    abandoned.fetch_sub(1, Ordering::AcqRel);
                }
                let _ = tx.send(result);
            });

        if let Err(e) = spawned {
            return Some(Err(anyhow::anyhow!("Failed to spawn detection thread: {}", e)));
        }

        match rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(_) => {
                // Counted before the swap so the helper never decrements first
                self.abandoned.fetch_add(1, Ordering::AcqRel);
                if state.swap(CALL_ABANDONED, Ordering::AcqRel) == CALL_DONE {
                    self.abandoned.fetch_sub(1, Ordering::AcqRel);
                }
                None
            }
        }
    }

    /// Decode encoded bytes (applying EXIF orientation) and locate a person
    pub fn locate_bytes(&self, bytes: &[u8], min_confidence: f32) -> Option<BoundingBox> {
        let image = match image::load_from_memory(bytes) {
            Ok(image) => image,
            Err(e) => {
                debug!("Cannot decode image for people detection: {}", e);
                return None;
            }
        };
        let image = orientation::apply_rotation(image, orientation::read_exif_orientation(bytes));
        self.locate(&image, min_confidence)
    }
}

/// Most confident person detection at or above the threshold
pub fn best_person(detections: &[Detection], min_confidence: f32) -> Option<BoundingBox> {
    detections
        .iter()
        .filter(|d| d.class_id == PERSON_CLASS_ID && d.bbox.confidence >= min_confidence)
        .map(|d| d.bbox)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn bbox(x: f32, y: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: 100.0,
            height: 200.0,
            confidence,
        }
    }

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    struct FixedDetector {
        detections: Vec<Detection>,
        calls: AtomicUsize,
    }

    impl FixedDetector {
        fn new(detections: Vec<Detection>) -> Arc<Self> {
            Arc::new(Self {
                detections,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PersonDetector for FixedDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }
    }

    struct FailingDetector;

    impl PersonDetector for FailingDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
            Err(anyhow::anyhow!("inference runtime crashed"))
        }
    }

    struct SlowDetector(Duration, AtomicUsize);

    impl SlowDetector {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self(delay, AtomicUsize::new(0)))
        }
    }

    impl PersonDetector for SlowDetector {
        fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
            self.1.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.0);
            Ok(vec![Detection {
                class_id: PERSON_CLASS_ID,
                bbox: bbox(0.0, 0.0, 0.99),
            }])
        }
    }

    #[test]
    fn test_best_person_filters_class_and_threshold() {
        let detections = vec![
            Detection {
                class_id: 2,
                bbox: bbox(0.0, 0.0, 0.99),
            },
            Detection {
                class_id: PERSON_CLASS_ID,
                bbox: bbox(10.0, 0.0, 0.4),
            },
            Detection {
                class_id: PERSON_CLASS_ID,
                bbox: bbox(20.0, 0.0, 0.8),
            },
            Detection {
                class_id: PERSON_CLASS_ID,
                bbox: bbox(30.0, 0.0, 0.6),
            },
        ];

        let best = best_person(&detections, 0.5).unwrap();
        assert_eq!(best.x, 20.0);
        assert_eq!(best.confidence, 0.8);

        assert!(best_person(&detections, 0.9).is_none());
        assert!(best_person(&[], 0.1).is_none());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let detections = vec![Detection {
            class_id: PERSON_CLASS_ID,
            bbox: bbox(0.0, 0.0, 0.5),
        }];
        assert!(best_person(&detections, 0.5).is_some());
    }

    #[test]
    fn test_bounding_box_center() {
        assert_eq!(bbox(10.0, 20.0, 1.0).center(), (60.0, 120.0));
    }

    #[test]
    fn test_locate_returns_best_person() {
        let detector = FixedDetector::new(vec![Detection {
            class_id: PERSON_CLASS_ID,
            bbox: bbox(5.0, 5.0, 0.9),
        }]);
        let locator = PersonLocator::with_detector(detector.clone());

        let found = locator.locate(&create_test_image(64, 64), 0.5).unwrap();
        assert_eq!(found.x, 5.0);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_detector_fails_open() {
        let locator = PersonLocator::unavailable();
        assert!(!locator.is_available());
        assert!(locator.locate(&create_test_image(16, 16), 0.5).is_none());
    }

    #[test]
    fn test_inference_error_fails_open() {
        let locator = PersonLocator::with_detector(Arc::new(FailingDetector));
        assert!(locator.locate(&create_test_image(16, 16), 0.5).is_none());
    }

    #[test]
    fn test_timeout_yields_none() {
        let locator = PersonLocator::with_detector(SlowDetector::new(Duration::from_millis(500)))
            .with_timeout(Duration::from_millis(20));
        assert!(locator.locate(&create_test_image(16, 16), 0.5).is_none());
    }

    #[test]
    fn test_no_new_inference_while_timed_out_call_runs() {
        let detector = SlowDetector::new(Duration::from_millis(300));
        let locator = PersonLocator::with_detector(detector.clone())
            .with_timeout(Duration::from_millis(20));
        let img = create_test_image(16, 16);

        assert!(locator.locate(&img, 0.5).is_none());
        assert!(locator.locate(&img, 0.5).is_none());
        assert_eq!(detector.1.load(Ordering::SeqCst), 1);

        // Once the stuck call finishes, detection is attempted again
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while locator.abandoned.load(Ordering::SeqCst) > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(locator.abandoned.load(Ordering::SeqCst), 0);
        assert!(locator.locate(&img, 0.5).is_none());
        assert_eq!(detector.1.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fast_detection_within_timeout() {
        let locator = PersonLocator::with_detector(SlowDetector::new(Duration::from_millis(1)))
            .with_timeout(Duration::from_secs(5));
        assert!(locator.locate(&create_test_image(16, 16), 0.5).is_some());
    }

    #[test]
    fn test_loader_runs_once_across_threads() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let locator = Arc::new(PersonLocator::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            let detector: Arc<dyn PersonDetector> = FixedDetector::new(Vec::new());
            Ok(detector)
        })));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locator = Arc::clone(&locator);
                std::thread::spawn(move || locator.is_available())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_is_not_retried() {
        let attempts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&attempts);
        let locator = PersonLocator::new(Box::new(move || {
            *counter.lock().unwrap() += 1;
            Err(anyhow::anyhow!("model file missing"))
        }));

        for _ in 0..3 {
            assert!(locator.locate(&create_test_image(8, 8), 0.5).is_none());
        }
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    #[test]
    fn test_locate_bytes_rejects_garbage() {
        let locator = PersonLocator::with_detector(FixedDetector::new(Vec::new()));
        assert!(locator.locate_bytes(b"definitely not an image", 0.5).is_none());
    }
}
