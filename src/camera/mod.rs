//! Live frame sources.
//!
//! This module provides the cameras a detection loop can pull frames from:
//! - Synthetic `stub://` cameras (tests and demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A camera is acquired with `open`, polled with `current_frame` once per
//! iteration, and handed back with `release`. Sources MUST NOT:
//! - Buffer frames beyond the one being returned
//! - Store captured frames to disk
//! - Log raw frame content

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

use crate::error::{DetectError, Result};
use crate::frame::Frame;

/// Camera settings shared by every source.
#[derive(Clone, Debug)]
pub struct CameraSettings {
    /// Device URI (e.g. "/dev/video0" or "stub://front").
    pub device: String,
    /// Preferred frame width. Devices may negotiate a different size.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Requested capture rate.
    pub target_fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Description of an opened stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// A live video source.
pub trait CameraSource {
    /// Device URI this source reads from.
    fn device(&self) -> &str;

    /// Acquire the device. Fails with `DeviceUnavailable` when the device is
    /// missing or access is denied.
    fn open(&mut self) -> Result<StreamInfo>;

    /// Capture the current frame. Fails with `StreamEnded` once the device is
    /// gone or when the source is not open.
    fn current_frame(&mut self) -> Result<Frame>;

    /// Release the device. Safe to call more than once.
    fn release(&mut self);

    fn is_open(&self) -> bool;
}

/// Build the camera named by `settings.device`. The device is not opened.
pub fn camera_for(settings: &CameraSettings) -> Result<Box<dyn CameraSource>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::from_settings(settings)?));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Camera::new(settings.clone())))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(DetectError::DeviceUnavailable(format!(
            "{} requires the ingest-v4l2 feature",
            settings.device
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_devices_build_synthetic_cameras() -> Result<()> {
        let camera = camera_for(&CameraSettings::default())?;
        assert_eq!(camera.device(), "stub://camera");
        assert!(!camera.is_open());
        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_devices_need_v4l2_feature() {
        let settings = CameraSettings {
            device: "/dev/video0".to_string(),
            ..CameraSettings::default()
        };
        let err = camera_for(&settings).err().expect("device should be rejected");
        assert!(matches!(err, DetectError::DeviceUnavailable(_)));
    }
}
