use crate::detect::model::ModelRef;
use crate::detect::result::DetectionBatch;
use crate::error::Result;
use crate::frame::Frame;

/// A loaded object-detection model.
///
/// Implementations treat the frame as read-only and must not keep it past the
/// call. Output boxes are `(y_min, x_min, y_max, x_max)` fractions of the
/// frame size.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn infer(&mut self, frame: &Frame) -> Result<DetectionBatch>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Turns a model reference into a ready detector. Called once per loop start.
pub trait ModelLoader {
    /// Backend identifier, also the registry key.
    fn name(&self) -> &'static str;

    /// Load the model. Fails with `ModelLoad`.
    fn load(&self, model: &ModelRef) -> Result<Box<dyn Detector>>;
}
