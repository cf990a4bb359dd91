#![cfg(feature = "backend-tract")]

use std::path::Path;

use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::config::ModelSettings;
use crate::detect::backend::{Detector, ModelLoader};
use crate::detect::model::{ModelCache, ModelRef, TensorLayout};
use crate::detect::result::{DetectionBatch, NormalizedBox};
use crate::error::{DetectError, Result};
use crate::frame::Frame;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract-based backend for ONNX detection models.
///
/// The model takes one `f32` image tensor scaled to `0..1` and produces three
/// outputs: boxes `[1, N, 4]` as `(y_min, x_min, y_max, x_max)`, scores
/// `[1, N]` and class ids `[1, N]`.
pub struct TractDetector {
    plan: Plan,
    input_width: u32,
    input_height: u32,
    layout: TensorLayout,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn from_path<P: AsRef<Path>>(
        model_path: P,
        input_width: u32,
        input_height: u32,
        layout: TensorLayout,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let load = |what: &str, err: TractError| {
            DetectError::ModelLoad(format!("{} {}: {}", what, model_path.display(), err))
        };

        let (h, w) = (input_height as usize, input_width as usize);
        let shape = match layout {
            TensorLayout::Nchw => tvec!(1, 3, h, w),
            TensorLayout::Nhwc => tvec!(1, h, w, 3),
        };
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load("failed to read ONNX model", e))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .map_err(|e| load("failed to set input fact for", e))?
            .into_optimized()
            .map_err(|e| load("failed to optimize", e))?
            .into_runnable()
            .map_err(|e| load("failed to build runnable plan for", e))?;

        Ok(Self {
            plan,
            input_width,
            input_height,
            layout,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized;
        let image = if frame.width() == self.input_width && frame.height() == self.input_height {
            frame.image()
        } else {
            resized = imageops::resize(
                frame.image(),
                self.input_width,
                self.input_height,
                FilterType::Triangle,
            );
            &resized
        };

        let (h, w) = (self.input_height as usize, self.input_width as usize);
        match self.layout {
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
                    image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
                })
                .into_tensor()
            }
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
                    image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
                })
                .into_tensor()
            }
        }
    }

    fn read_outputs(outputs: &TVec<TValue>) -> Result<DetectionBatch> {
        if outputs.len() < 3 {
            return Err(DetectError::Inference(format!(
                "model produced {} outputs, expected boxes, scores and classes",
                outputs.len()
            )));
        }
        let as_f32 = |index: usize, what: &str| -> Result<Vec<f32>> {
            let cast = outputs[index]
                .cast_to::<f32>()
                .map_err(|e| DetectError::Inference(format!("{} output: {}", what, e)))?;
            let slice = cast
                .as_slice::<f32>()
                .map_err(|e| DetectError::Inference(format!("{} output: {}", what, e)))?;
            Ok(slice.to_vec())
        };

        let flat_boxes = as_f32(0, "boxes")?;
        if flat_boxes.len() % 4 != 0 {
            return Err(DetectError::Inference(format!(
                "boxes output has {} values, not a multiple of 4",
                flat_boxes.len()
            )));
        }
        let boxes = flat_boxes
            .chunks_exact(4)
            .map(|row| NormalizedBox::new(row[0], row[1], row[2], row[3]))
            .collect();
        let scores = as_f32(1, "scores")?;
        let classes = as_f32(2, "classes")?
            .into_iter()
            .map(|class| class.max(0.0).round() as u32)
            .collect();

        DetectionBatch::new(boxes, scores, classes)
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionBatch> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::Inference("empty frame".to_string()));
        }
        let input = self.build_input(frame);
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| DetectError::Inference(format!("ONNX inference failed: {}", e)))?;
        Self::read_outputs(&outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::from_rgb(
            self.input_width,
            self.input_height,
            vec![0u8; self.input_width as usize * self.input_height as usize * 3],
            0,
        )?;
        self.infer(&blank)
            .map(|_| ())
            .map_err(|e| DetectError::ModelLoad(format!("model rejected warm-up frame: {}", e)))
    }
}

/// Loader for ONNX models, local or fetched through the model cache.
pub struct TractLoader {
    cache: ModelCache,
    input_width: u32,
    input_height: u32,
    layout: TensorLayout,
}

impl TractLoader {
    pub fn new(cache: ModelCache, input_width: u32, input_height: u32, layout: TensorLayout) -> Self {
        Self {
            cache,
            input_width,
            input_height,
            layout,
        }
    }

    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self::new(
            ModelCache::new(&settings.cache_dir),
            settings.input_width,
            settings.input_height,
            settings.layout,
        )
    }
}

impl ModelLoader for TractLoader {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(&self, model: &ModelRef) -> Result<Box<dyn Detector>> {
        let path = self.cache.resolve(model)?;
        log::info!("loading ONNX model from {}", path.display());
        let detector =
            TractDetector::from_path(&path, self.input_width, self.input_height, self.layout)?;
        Ok(Box::new(detector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_models_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = TractLoader::new(ModelCache::new(dir.path()), 32, 32, TensorLayout::Nchw);
        let model = ModelRef::parse("stub://model").expect("stub ref");
        assert!(matches!(
            loader.load(&model),
            Err(DetectError::ModelLoad(_))
        ));
    }

    #[test]
    fn garbage_file_is_model_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not a protobuf").expect("write model");
        let loader = TractLoader::new(ModelCache::new(dir.path()), 32, 32, TensorLayout::Nchw);
        assert!(matches!(
            loader.load(&ModelRef::Local(path)),
            Err(DetectError::ModelLoad(_))
        ));
    }

    #[test]
    fn mismatched_outputs_are_detected() {
        let boxes = tract_ndarray::Array3::<f32>::zeros((1, 2, 4)).into_tensor();
        let scores = tract_ndarray::Array2::<f32>::zeros((1, 2)).into_tensor();
        let classes = tract_ndarray::Array2::<f32>::zeros((1, 1)).into_tensor();
        let outputs: TVec<TValue> = tvec!(boxes.into(), scores.into(), classes.into());
        assert!(matches!(
            TractDetector::read_outputs(&outputs),
            Err(DetectError::BatchMismatch {
                boxes: 2,
                scores: 2,
                classes: 1
            })
        ));
    }
}
