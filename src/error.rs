//! Error types for the detection loop.

use thiserror::Error;

/// Failures raised by cameras, detectors, the overlay and the loop itself.
///
/// `DeviceUnavailable` and `ModelLoad` are startup errors and abort
/// `DetectionLoop::start`. The remaining kinds are recovered per iteration.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("camera stream ended: {0}")]
    StreamEnded(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("detection batch length mismatch: {boxes} boxes, {scores} scores, {classes} classes")]
    BatchMismatch {
        boxes: usize,
        scores: usize,
        classes: usize,
    },

    #[error("render failed: {0}")]
    Render(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DetectError {
    /// True for errors that only spoil the current iteration.
    pub fn is_per_iteration(&self) -> bool {
        matches!(
            self,
            DetectError::StreamEnded(_)
                | DetectError::Inference(_)
                | DetectError::BatchMismatch { .. }
                | DetectError::Render(_)
        )
    }
}

pub type Result<T, E = DetectError> = std::result::Result<T, E>;
