//! Drawing surface for frames and detection boxes.
//!
//! The overlay owns an RGB surface sized once from the first frame. Every
//! iteration clears it, paints the current frame, then strokes the boxes
//! whose score is strictly above the confidence threshold. Drawing on a
//! detached surface is a `Render` error.

pub mod font;
mod sink;

pub use sink::{FrameSink, NullSink, SnapshotSink};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::{DetectionBatch, PixelRect};
use crate::error::{DetectError, Result};
use crate::frame::Frame;

/// Overlay styling and the confidence filter.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlaySettings {
    /// Boxes are drawn only when `score > confidence_threshold`.
    pub confidence_threshold: f32,
    pub line_width: u32,
    pub box_color: [u8; 3],
    /// Derive a stable color per class instead of `box_color`.
    pub color_by_class: bool,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            line_width: 2,
            box_color: [255, 0, 0],
            color_by_class: false,
        }
    }
}

/// Label text for one detection.
pub fn label_for(class_id: u32, score: f32) -> String {
    format!("Class: {} Score: {:.2}", class_id, score)
}

/// Deterministic, reasonably saturated color for a class id.
pub fn class_color(class_id: u32) -> Rgb<u8> {
    let mut hash = class_id.wrapping_add(1).wrapping_mul(2_654_435_761);
    let mut channel = || {
        hash = hash.rotate_left(11).wrapping_mul(2_654_435_761);
        64 + (hash >> 24) as u8 % 192
    };
    Rgb([channel(), channel(), channel()])
}

/// Clip a pixel rect to `[-line_width, size + line_width]` on both axes and
/// round it to integer `(x, y, width, height)`. `None` when nothing of it
/// remains on the surface. Non-finite rects are a `Render` error.
fn clip_rect(
    rect: PixelRect,
    (surface_w, surface_h): (u32, u32),
    line_width: i32,
) -> Result<Option<(i32, i32, u32, u32)>> {
    if !(rect.x.is_finite() && rect.y.is_finite() && rect.width.is_finite() && rect.height.is_finite()) {
        return Err(DetectError::Render(format!("non-finite box {:?}", rect)));
    }
    let margin = line_width as f32;
    let clamp_x = |v: f32| v.clamp(-margin, surface_w as f32 + margin);
    let clamp_y = |v: f32| v.clamp(-margin, surface_h as f32 + margin);

    let (x0, x1) = (clamp_x(rect.x.min(rect.x + rect.width)), clamp_x(rect.x.max(rect.x + rect.width)));
    let (y0, y1) = (clamp_y(rect.y.min(rect.y + rect.height)), clamp_y(rect.y.max(rect.y + rect.height)));
    let (left, top) = (x0.round() as i32, y0.round() as i32);
    let width = (x1.round() as i32 - left).max(0) as u32;
    let height = (y1.round() as i32 - top).max(0) as u32;

    let on_surface = left < surface_w as i32
        && top < surface_h as i32
        && left + width as i32 > 0
        && top + height as i32 > 0;
    if !on_surface {
        return Ok(None);
    }
    Ok(Some((left, top, width.max(1), height.max(1))))
}

pub struct Overlay {
    surface: Option<RgbImage>,
    settings: OverlaySettings,
}

impl Overlay {
    pub fn new(settings: OverlaySettings) -> Self {
        Self {
            surface: None,
            settings,
        }
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn threshold(&self) -> f32 {
        self.settings.confidence_threshold
    }

    /// Allocate a `width` x `height` surface, replacing any previous one.
    pub fn attach(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(DetectError::Render(format!(
                "cannot attach a {}x{} surface",
                width, height
            )));
        }
        self.surface = Some(RgbImage::new(width, height));
        log::debug!("overlay attached at {}x{}", width, height);
        Ok(())
    }

    pub fn detach(&mut self) {
        self.surface = None;
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.surface.as_ref().map(|s| s.dimensions())
    }

    pub fn surface(&self) -> Option<&RgbImage> {
        self.surface.as_ref()
    }

    fn surface_mut(&mut self) -> Result<&mut RgbImage> {
        self.surface
            .as_mut()
            .ok_or_else(|| DetectError::Render("surface is detached".to_string()))
    }

    pub fn clear(&mut self) -> Result<()> {
        let surface = self.surface_mut()?;
        surface.pixels_mut().for_each(|p| *p = Rgb([0, 0, 0]));
        Ok(())
    }

    /// Paint the frame over the whole surface, scaling when sizes differ.
    pub fn draw_frame(&mut self, frame: &Frame) -> Result<()> {
        let surface = self.surface_mut()?;
        let (width, height) = surface.dimensions();
        if frame.width() == width && frame.height() == height {
            surface.copy_from_slice(frame.pixels());
        } else {
            let scaled = imageops::resize(frame.image(), width, height, FilterType::Triangle);
            surface.copy_from_slice(scaled.as_raw());
        }
        Ok(())
    }

    /// Stroke `rect` and write `label` at its top-left corner.
    ///
    /// The rect is clipped to the surface first; a rect with nothing left
    /// on the surface draws nothing.
    pub fn draw_box(&mut self, rect: PixelRect, label: &str, color: Rgb<u8>) -> Result<()> {
        let line_width = self.settings.line_width.max(1) as i32;
        let surface = self.surface_mut()?;
        let Some((x, y, width, height)) = clip_rect(rect, surface.dimensions(), line_width)? else {
            log::debug!("box {:?} lies off the surface", rect);
            return Ok(());
        };

        for inset in 0..line_width {
            let w = width.saturating_sub(2 * inset as u32);
            let h = height.saturating_sub(2 * inset as u32);
            if w == 0 || h == 0 {
                break;
            }
            draw_hollow_rect_mut(surface, Rect::at(x + inset, y + inset).of_size(w, h), color);
        }

        let text_y = if y >= font::GLYPH_HEIGHT + 2 {
            y - font::GLYPH_HEIGHT - 2
        } else {
            y.max(0) + line_width + 1
        };
        font::draw_text(surface, label, x.max(0), text_y, color);
        Ok(())
    }

    /// Draw every detection above the threshold. Returns the batch indices drawn.
    pub fn draw_detections(&mut self, batch: &DetectionBatch) -> Result<Vec<usize>> {
        let (width, height) = self
            .dimensions()
            .ok_or_else(|| DetectError::Render("surface is detached".to_string()))?;
        let threshold = self.settings.confidence_threshold;

        let mut drawn = Vec::new();
        for (index, detection) in batch.above(threshold) {
            let color = if self.settings.color_by_class {
                class_color(detection.class_id)
            } else {
                Rgb(self.settings.box_color)
            };
            let rect = detection.bbox.to_pixels(width, height);
            let line_width = self.settings.line_width.max(1) as i32;
            if clip_rect(rect, (width, height), line_width)?.is_none() {
                continue;
            }
            self.draw_box(rect, &label_for(detection.class_id, detection.score), color)?;
            drawn.push(index);
        }
        Ok(drawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::NormalizedBox;

    fn gradient(width: u32, height: u32, seed: u8) -> Frame {
        let pixels = (0..width * height * 3)
            .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed))
            .collect();
        Frame::from_rgb(width, height, pixels, seed as u64).unwrap()
    }

    #[test]
    fn detached_surface_is_render_error() {
        let mut overlay = Overlay::new(OverlaySettings::default());
        assert!(matches!(overlay.clear(), Err(DetectError::Render(_))));
        assert!(matches!(
            overlay.draw_frame(&gradient(4, 4, 0)),
            Err(DetectError::Render(_))
        ));
        let rect = PixelRect {
            x: 0.0,
            y: 0.0,
            width: 2.0,
            height: 2.0,
        };
        assert!(matches!(
            overlay.draw_box(rect, "x", Rgb([255, 0, 0])),
            Err(DetectError::Render(_))
        ));
    }

    #[test]
    fn clear_then_draw_frame_is_idempotent() -> Result<()> {
        let frame = gradient(16, 12, 3);
        let mut once = Overlay::new(OverlaySettings::default());
        once.attach(16, 12)?;
        once.clear()?;
        once.draw_frame(&frame)?;

        let mut twice = Overlay::new(OverlaySettings::default());
        twice.attach(16, 12)?;
        for _ in 0..2 {
            twice.clear()?;
            twice.draw_frame(&frame)?;
        }
        assert_eq!(once.surface(), twice.surface());
        assert_eq!(once.surface().map(|s| s.as_raw().as_slice()), Some(frame.pixels()));
        Ok(())
    }

    #[test]
    fn clear_erases_previous_boxes() -> Result<()> {
        let frame = gradient(32, 32, 9);
        let mut overlay = Overlay::new(OverlaySettings::default());
        overlay.attach(32, 32)?;
        overlay.draw_frame(&frame)?;
        let batch = DetectionBatch::new(vec![NormalizedBox::new(0.5, 0.5, 0.9, 0.9)], vec![0.99], vec![1])?;
        overlay.draw_detections(&batch)?;

        overlay.clear()?;
        overlay.draw_frame(&frame)?;
        assert_eq!(overlay.surface().map(|s| s.as_raw().as_slice()), Some(frame.pixels()));
        Ok(())
    }

    #[test]
    fn draws_only_scores_above_threshold() -> Result<()> {
        let mut overlay = Overlay::new(OverlaySettings::default());
        overlay.attach(100, 100)?;
        let b = NormalizedBox::new(0.2, 0.2, 0.6, 0.6);
        let batch = DetectionBatch::new(vec![b; 4], vec![0.9, 0.3, 0.6, 0.5], vec![0, 1, 2, 3])?;
        assert_eq!(overlay.draw_detections(&batch)?, vec![0, 2]);
        Ok(())
    }

    #[test]
    fn box_outline_lands_on_mapped_pixels() -> Result<()> {
        let mut overlay = Overlay::new(OverlaySettings {
            line_width: 1,
            ..OverlaySettings::default()
        });
        overlay.attach(100, 50)?;
        overlay.clear()?;
        let batch = DetectionBatch::new(vec![NormalizedBox::new(0.4, 0.1, 0.8, 0.5)], vec![0.8], vec![0])?;
        overlay.draw_detections(&batch)?;

        let surface = overlay.surface().expect("attached");
        // x = 10, y = 20, w = 40, h = 20
        assert_eq!(surface.get_pixel(10, 30).0, [255, 0, 0]);
        assert_eq!(surface.get_pixel(49, 30).0, [255, 0, 0]);
        assert_eq!(surface.get_pixel(30, 39).0, [255, 0, 0]);
        assert_eq!(surface.get_pixel(30, 30).0, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn far_out_of_range_boxes_are_skipped() -> Result<()> {
        let mut overlay = Overlay::new(OverlaySettings::default());
        overlay.attach(100, 100)?;
        overlay.clear()?;
        let batch = DetectionBatch::new(
            vec![
                NormalizedBox::new(0.0, 1.0e8, 1.0, 1.0e8 + 0.5),
                NormalizedBox::new(-3.0e9, -3.0e9, -2.0e9, -2.0e9),
            ],
            vec![0.9, 0.9],
            vec![0, 1],
        )?;
        assert!(overlay.draw_detections(&batch)?.is_empty());
        assert!(overlay
            .surface()
            .expect("attached")
            .pixels()
            .all(|p| p.0 == [0, 0, 0]));
        Ok(())
    }

    #[test]
    fn boxes_crossing_the_edge_are_clipped() -> Result<()> {
        let mut overlay = Overlay::new(OverlaySettings {
            line_width: 1,
            ..OverlaySettings::default()
        });
        overlay.attach(100, 100)?;
        overlay.clear()?;
        // Pixel-space output from a model: x -50..150, y 20..60.
        let batch = DetectionBatch::new(vec![NormalizedBox::new(0.2, -0.5, 0.6, 1.5)], vec![0.8], vec![0])?;
        assert_eq!(overlay.draw_detections(&batch)?, vec![0]);

        let surface = overlay.surface().expect("attached");
        assert_eq!(surface.get_pixel(50, 20).0, [255, 0, 0]);
        assert_eq!(surface.get_pixel(50, 59).0, [255, 0, 0]);
        assert_eq!(surface.get_pixel(50, 40).0, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn non_finite_box_is_render_error() -> Result<()> {
        let mut overlay = Overlay::new(OverlaySettings::default());
        overlay.attach(10, 10)?;
        let rect = PixelRect {
            x: f32::NAN,
            y: 0.0,
            width: f32::INFINITY,
            height: 1.0,
        };
        assert!(matches!(
            overlay.draw_box(rect, "x", Rgb([255, 0, 0])),
            Err(DetectError::Render(_))
        ));
        Ok(())
    }

    #[test]
    fn scales_mismatched_frames() -> Result<()> {
        let mut overlay = Overlay::new(OverlaySettings::default());
        overlay.attach(8, 8)?;
        let frame = Frame::from_rgb(4, 4, vec![200u8; 48], 0)?;
        overlay.draw_frame(&frame)?;
        assert!(overlay
            .surface()
            .expect("attached")
            .pixels()
            .all(|p| p.0 == [200, 200, 200]));
        Ok(())
    }

    #[test]
    fn class_colors_are_stable() {
        assert_eq!(class_color(7), class_color(7));
        assert_ne!(class_color(1), class_color(2));
        assert_eq!(label_for(3, 0.876), "Class: 3 Score: 0.88");
    }
}
