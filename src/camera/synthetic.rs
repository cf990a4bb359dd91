//! Synthetic camera for `stub://` devices.
//!
//! Renders a dark gradient with a bright square that moves a few pixels per
//! frame, so a detector always has something to find. Query parameters tune
//! the stream:
//! - `frames=N`: the stream ends after N frames (simulates an unplug)
//! - `unavailable=1`: `open` fails as if permission was denied

use url::Url;

use super::{CameraSettings, CameraSource, StreamInfo};
use crate::error::{DetectError, Result};
use crate::frame::Frame;

const BACKGROUND_MAX: u8 = 64;
const SQUARE_LUMA: u8 = 250;
const SQUARE_STEP_PX: u32 = 8;

pub struct SyntheticCamera {
    device: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    unavailable: bool,
    frame_count: u64,
    open: bool,
}

impl SyntheticCamera {
    pub fn new(device: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
            frame_limit: None,
            unavailable: false,
            frame_count: 0,
            open: false,
        }
    }

    /// Build from settings, honouring the query parameters on the device URI.
    pub fn from_settings(settings: &CameraSettings) -> Result<Self> {
        let url = Url::parse(&settings.device).map_err(|e| {
            DetectError::DeviceUnavailable(format!("invalid device {}: {}", settings.device, e))
        })?;

        let mut camera = Self::new(settings.device.clone(), settings.width, settings.height);
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    let limit = value.parse::<u64>().map_err(|_| {
                        DetectError::DeviceUnavailable(format!(
                            "frames must be an integer in {}",
                            settings.device
                        ))
                    })?;
                    camera.frame_limit = Some(limit);
                }
                "unavailable" => camera.unavailable = value != "0",
                other => {
                    log::warn!(
                        "SyntheticCamera: ignoring unknown parameter {} on {}",
                        other,
                        settings.device
                    );
                }
            }
        }
        Ok(camera)
    }

    /// End the stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Pixel rectangle (x, y, side) of the bright square in the given frame.
    pub fn square_at(&self, sequence: u64) -> (u32, u32, u32) {
        let side = (self.width.min(self.height) / 4).max(1);
        let travel = self.width.saturating_sub(side).max(1) as u64;
        let x = ((sequence * SQUARE_STEP_PX as u64) % travel) as u32;
        let y = (self.height - side) / 2;
        (x, y, side)
    }

    fn render(&self, sequence: u64) -> Vec<u8> {
        let (sx, sy, side) = self.square_at(sequence);
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                let inside = x >= sx && x < sx + side && y >= sy && y < sy + side;
                if inside {
                    pixels.extend_from_slice(&[SQUARE_LUMA; 3]);
                } else {
                    let shade = ((x + y) % BACKGROUND_MAX as u32) as u8;
                    pixels.extend_from_slice(&[shade / 2, shade, shade / 3]);
                }
            }
        }
        pixels
    }
}

impl CameraSource for SyntheticCamera {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(&mut self) -> Result<StreamInfo> {
        if self.unavailable {
            return Err(DetectError::DeviceUnavailable(format!(
                "{}: permission denied",
                self.device
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(DetectError::DeviceUnavailable(format!(
                "{}: zero-sized stream",
                self.device
            )));
        }
        self.open = true;
        log::info!(
            "SyntheticCamera: opened {} ({}x{})",
            self.device,
            self.width,
            self.height
        );
        Ok(StreamInfo {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
        })
    }

    fn current_frame(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(DetectError::StreamEnded(format!(
                "{} is not open",
                self.device
            )));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Err(DetectError::StreamEnded(format!(
                "{} disconnected after {} frames",
                self.device, self.frame_count
            )));
        }
        let sequence = self.frame_count;
        self.frame_count += 1;
        Frame::from_rgb(self.width, self.height, self.render(sequence), sequence)
    }

    fn release(&mut self) {
        if self.open {
            log::info!("SyntheticCamera: released {}", self.device);
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(device: &str) -> CameraSettings {
        CameraSettings {
            device: device.to_string(),
            width: 64,
            height: 48,
            target_fps: 30,
        }
    }

    #[test]
    fn produces_frames_of_configured_size() -> Result<()> {
        let mut camera = SyntheticCamera::from_settings(&settings("stub://test"))?;
        let info = camera.open()?;
        assert_eq!((info.width, info.height), (64, 48));

        let frame = camera.current_frame()?;
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(frame.sequence(), 0);
        assert_eq!(camera.current_frame()?.sequence(), 1);
        Ok(())
    }

    #[test]
    fn square_is_bright_and_moves() -> Result<()> {
        let mut camera = SyntheticCamera::new("stub://test", 64, 48);
        camera.open()?;
        let first = camera.current_frame()?;
        let (x, y, _) = camera.square_at(0);
        assert_eq!(first.image().get_pixel(x, y).0, [SQUARE_LUMA; 3]);
        assert_ne!(camera.square_at(0), camera.square_at(1));
        Ok(())
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<()> {
        let mut camera = SyntheticCamera::from_settings(&settings("stub://test?frames=1"))?;
        camera.open()?;
        camera.current_frame()?;
        let err = camera.current_frame().unwrap_err();
        assert!(matches!(err, DetectError::StreamEnded(_)));
        Ok(())
    }

    #[test]
    fn unavailable_flag_fails_open() -> Result<()> {
        let mut camera = SyntheticCamera::from_settings(&settings("stub://test?unavailable=1"))?;
        let err = camera.open().unwrap_err();
        assert!(matches!(err, DetectError::DeviceUnavailable(_)));
        assert!(!camera.is_open());
        Ok(())
    }

    #[test]
    fn released_camera_stops_producing_frames() -> Result<()> {
        let mut camera = SyntheticCamera::new("stub://test", 8, 8);
        camera.open()?;
        camera.release();
        camera.release();
        assert!(!camera.is_open());
        assert!(matches!(
            camera.current_frame().unwrap_err(),
            DetectError::StreamEnded(_)
        ));
        Ok(())
    }
}
