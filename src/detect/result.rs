use crate::error::{DetectError, Result};

/// Bounding box as fractions of the frame size, in detector output order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedBox {
    pub y_min: f32,
    pub x_min: f32,
    pub y_max: f32,
    pub x_max: f32,
}

impl NormalizedBox {
    pub fn new(y_min: f32, x_min: f32, y_max: f32, x_max: f32) -> Self {
        Self {
            y_min,
            x_min,
            y_max,
            x_max,
        }
    }

    /// From a `[y_min, x_min, y_max, x_max]` model row.
    pub fn from_row(row: [f32; 4]) -> Self {
        Self::new(row[0], row[1], row[2], row[3])
    }

    pub fn to_row(self) -> [f32; 4] {
        [self.y_min, self.x_min, self.y_max, self.x_max]
    }

    /// Scale to a pixel rectangle on a `width` x `height` surface.
    pub fn to_pixels(self, width: u32, height: u32) -> PixelRect {
        let w = width as f32;
        let h = height as f32;
        PixelRect {
            x: self.x_min * w,
            y: self.y_min * h,
            width: (self.x_max - self.x_min) * w,
            height: (self.y_max - self.y_min) * h,
        }
    }
}

/// Rectangle in surface pixels, origin top-left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    /// Inverse of `NormalizedBox::to_pixels`.
    pub fn to_normalized(self, width: u32, height: u32) -> NormalizedBox {
        let w = width as f32;
        let h = height as f32;
        NormalizedBox {
            y_min: self.y / h,
            x_min: self.x / w,
            y_max: (self.y + self.height) / h,
            x_max: (self.x + self.width) / w,
        }
    }
}

/// One predicted object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: NormalizedBox,
    pub class_id: u32,
    pub score: f32,
}

/// Detections for one frame, kept as parallel arrays.
///
/// Lengths are checked at construction, so an existing batch always has
/// one score and one class per box.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    boxes: Vec<NormalizedBox>,
    scores: Vec<f32>,
    classes: Vec<u32>,
}

impl DetectionBatch {
    pub fn new(boxes: Vec<NormalizedBox>, scores: Vec<f32>, classes: Vec<u32>) -> Result<Self> {
        if boxes.len() != scores.len() || boxes.len() != classes.len() {
            return Err(DetectError::BatchMismatch {
                boxes: boxes.len(),
                scores: scores.len(),
                classes: classes.len(),
            });
        }
        Ok(Self {
            boxes,
            scores,
            classes,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_detections(detections: &[Detection]) -> Self {
        Self {
            boxes: detections.iter().map(|d| d.bbox).collect(),
            scores: detections.iter().map(|d| d.score).collect(),
            classes: detections.iter().map(|d| d.class_id).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn boxes(&self) -> &[NormalizedBox] {
        &self.boxes
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn classes(&self) -> &[u32] {
        &self.classes
    }

    pub fn get(&self, index: usize) -> Option<Detection> {
        Some(Detection {
            bbox: *self.boxes.get(index)?,
            class_id: *self.classes.get(index)?,
            score: *self.scores.get(index)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Detection> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Detections scoring strictly above `threshold`, with their batch index.
    pub fn above(&self, threshold: f32) -> impl Iterator<Item = (usize, Detection)> + '_ {
        self.iter()
            .enumerate()
            .filter(move |(_, detection)| detection.score > threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> NormalizedBox {
        NormalizedBox::new(0.1, 0.2, 0.5, 0.6)
    }

    #[test]
    fn pixel_mapping_matches_surface_scale() {
        let rect = unit_box().to_pixels(200, 100);
        assert!((rect.x - 40.0).abs() < 1e-4);
        assert!((rect.y - 10.0).abs() < 1e-4);
        assert!((rect.width - 80.0).abs() < 1e-4);
        assert!((rect.height - 40.0).abs() < 1e-4);
    }

    #[test]
    fn pixel_mapping_round_trips() {
        let original = NormalizedBox::new(0.125, 0.33, 0.9, 0.75);
        let back = original.to_pixels(641, 479).to_normalized(641, 479);
        for (a, b) in original.to_row().iter().zip(back.to_row()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = DetectionBatch::new(vec![unit_box(); 3], vec![0.9, 0.1], vec![1, 2, 3])
            .unwrap_err();
        assert!(matches!(
            err,
            DetectError::BatchMismatch {
                boxes: 3,
                scores: 2,
                classes: 3
            }
        ));
    }

    #[test]
    fn threshold_is_strict() -> Result<()> {
        let batch = DetectionBatch::new(
            vec![unit_box(); 4],
            vec![0.9, 0.3, 0.6, 0.5],
            vec![1, 2, 3, 4],
        )?;
        let kept: Vec<usize> = batch.above(0.5).map(|(i, _)| i).collect();
        assert_eq!(kept, vec![0, 2]);
        Ok(())
    }

    #[test]
    fn index_ties_box_score_and_class() -> Result<()> {
        let boxes = vec![unit_box(), NormalizedBox::new(0.0, 0.0, 1.0, 1.0)];
        let batch = DetectionBatch::new(boxes.clone(), vec![0.2, 0.8], vec![7, 9])?;
        let second = batch.get(1).expect("second detection");
        assert_eq!(second.bbox, boxes[1]);
        assert_eq!(second.class_id, 9);
        assert_eq!(second.score, 0.8);
        assert!(batch.get(2).is_none());
        Ok(())
    }
}
