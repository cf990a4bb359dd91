use crate::detect::backend::{Detector, ModelLoader};
use crate::detect::model::ModelRef;
use crate::detect::result::{Detection, DetectionBatch, NormalizedBox};
use crate::error::{DetectError, Result};
use crate::frame::Frame;

/// Stub detector for testing. Replays a fixed list of batches, one per frame.
pub struct StubDetector {
    batches: Vec<DetectionBatch>,
    next: usize,
}

impl StubDetector {
    pub fn new(batches: Vec<DetectionBatch>) -> Self {
        Self { batches, next: 0 }
    }

    pub fn frames_seen(&self) -> usize {
        self.next
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionBatch> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::Inference("empty frame".to_string()));
        }
        let batch = if self.batches.is_empty() {
            DetectionBatch::empty()
        } else {
            self.batches[self.next % self.batches.len()].clone()
        };
        self.next += 1;
        Ok(batch)
    }
}

/// Loader for `stub://` models.
pub struct StubLoader {
    batches: Vec<DetectionBatch>,
}

impl StubLoader {
    pub fn new(batches: Vec<DetectionBatch>) -> Self {
        Self { batches }
    }
}

impl Default for StubLoader {
    /// One confident centred box and one weak box, on every frame.
    fn default() -> Self {
        let batch = DetectionBatch::from_detections(&[
            Detection {
                bbox: NormalizedBox::new(0.25, 0.25, 0.75, 0.75),
                class_id: 0,
                score: 0.9,
            },
            Detection {
                bbox: NormalizedBox::new(0.05, 0.05, 0.2, 0.2),
                class_id: 1,
                score: 0.3,
            },
        ]);
        Self::new(vec![batch])
    }
}

impl ModelLoader for StubLoader {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn load(&self, model: &ModelRef) -> Result<Box<dyn Detector>> {
        if !model.is_builtin() {
            return Err(DetectError::ModelLoad(format!(
                "stub backend cannot load {}",
                model
            )));
        }
        Ok(Box::new(StubDetector::new(self.batches.clone())))
    }
}
