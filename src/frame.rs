//! Captured video frames.
//!
//! A `Frame` is produced fresh by a camera each iteration, lent to the
//! detector and the overlay, and dropped when the iteration ends.
//! Pixels are always packed RGB8; cameras convert device formats before
//! constructing a frame.

use image::RgbImage;
use std::time::Instant;

use crate::error::{DetectError, Result};

/// One decoded RGB8 image from a live source.
pub struct Frame {
    image: RgbImage,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap packed RGB8 bytes. Fails when the buffer does not match the dimensions.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(DetectError::Inference(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
            DetectError::Inference(format!("invalid frame dimensions {}x{}", width, height))
        })?;
        Ok(Self::from_image(image, sequence))
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Monotonic counter assigned by the camera.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn age(&self) -> std::time::Duration {
        self.captured_at.elapsed()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB8 pixels, row major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

impl std::fmt::Debug for Frame {
    // Pixel content stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| DetectError::Inference("frame dimensions overflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(2, 2, vec![0u8; 12], 0).is_ok());
        let err = Frame::from_rgb(2, 2, vec![0u8; 11], 0).unwrap_err();
        assert!(matches!(err, DetectError::Inference(_)));
    }

    #[test]
    fn debug_omits_pixels() {
        let frame = Frame::from_rgb(1, 1, vec![7, 8, 9], 42).unwrap();
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("sequence: 42"));
        assert!(!rendered.contains("image"));
        assert!(!rendered.contains("[7, 8, 9]"));
    }
}
