use crate::detect::backend::{Detector, ModelLoader};
use crate::detect::model::ModelRef;
use crate::detect::result::{DetectionBatch, NormalizedBox};
use crate::error::{DetectError, Result};
use crate::frame::Frame;

const DEFAULT_LUMA_CUTOFF: u8 = 200;

/// CPU backend that boxes the bright region of a frame.
///
/// Reports a single detection (class 0) covering every pixel brighter than
/// the cutoff. The score is the fraction of the box that is actually bright,
/// so a solid blob scores near 1.0 and scattered highlights score low.
pub struct CpuDetector {
    luma_cutoff: u8,
}

impl CpuDetector {
    pub fn new(luma_cutoff: u8) -> Self {
        Self { luma_cutoff }
    }
}

impl Default for CpuDetector {
    fn default() -> Self {
        Self::new(DEFAULT_LUMA_CUTOFF)
    }
}

fn luma(rgb: [u8; 3]) -> u8 {
    let [r, g, b] = rgb.map(u32::from);
    ((299 * r + 587 * g + 114 * b) / 1000) as u8
}

impl Detector for CpuDetector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionBatch> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(DetectError::Inference("empty frame".to_string()));
        }

        let mut bright = 0u64;
        let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (x, y, pixel) in frame.image().enumerate_pixels() {
            if luma(pixel.0) > self.luma_cutoff {
                bright += 1;
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
            }
        }
        if bright == 0 {
            return Ok(DetectionBatch::empty());
        }

        let area = (x1 - x0 + 1) as u64 * (y1 - y0 + 1) as u64;
        let score = (bright as f32 / area as f32).clamp(0.0, 1.0);
        let bbox = NormalizedBox::new(
            y0 as f32 / height as f32,
            x0 as f32 / width as f32,
            (y1 + 1) as f32 / height as f32,
            (x1 + 1) as f32 / width as f32,
        );
        DetectionBatch::new(vec![bbox], vec![score], vec![0])
    }
}

/// Loader for the CPU backend. Accepts `stub://` models only.
#[derive(Default)]
pub struct CpuLoader {
    luma_cutoff: Option<u8>,
}

impl CpuLoader {
    pub fn with_cutoff(luma_cutoff: u8) -> Self {
        Self {
            luma_cutoff: Some(luma_cutoff),
        }
    }
}

impl ModelLoader for CpuLoader {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn load(&self, model: &ModelRef) -> Result<Box<dyn Detector>> {
        if !model.is_builtin() {
            return Err(DetectError::ModelLoad(format!(
                "cpu backend has no model format for {}",
                model
            )));
        }
        Ok(Box::new(CpuDetector::new(
            self.luma_cutoff.unwrap_or(DEFAULT_LUMA_CUTOFF),
        )))
    }
}
