//! V4L2 camera.
//!
//! Captures from a local device node (e.g. /dev/video0) through memory-mapped
//! streaming. The device is negotiated to RGB3 when the driver allows it,
//! otherwise YUYV, and every frame is converted to packed RGB8.

use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraSettings, CameraSource, StreamInfo};
use crate::error::{DetectError, Result};
use crate::frame::Frame;

const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Camera {
    settings: CameraSettings,
    state: Option<V4l2State>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    stride: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            format: PixelFormat::Rgb24,
            stride: 0,
            frame_count: 0,
        }
    }

    fn unavailable(&self, what: &str, err: impl std::fmt::Display) -> DetectError {
        DetectError::DeviceUnavailable(format!("{} {}: {}", what, self.settings.device, err))
    }

    fn negotiate(&mut self, device: &v4l::Device) -> Result<()> {
        use v4l::video::Capture;

        let mut format = device
            .format()
            .map_err(|e| self.unavailable("read format of", e))?;
        format.width = self.settings.width;
        format.height = self.settings.height;

        let mut negotiated = None;
        for fourcc in [b"RGB3", b"YUYV"] {
            format.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&format) {
                Ok(applied) if PixelFormat::from_fourcc(&applied.fourcc.repr).is_some() => {
                    negotiated = Some(applied);
                    break;
                }
                Ok(applied) => {
                    log::debug!(
                        "V4l2Camera: {} answered {} for {}",
                        self.settings.device,
                        applied.fourcc,
                        String::from_utf8_lossy(fourcc)
                    );
                }
                Err(err) => {
                    log::warn!(
                        "V4l2Camera: failed to set {} on {}: {}",
                        String::from_utf8_lossy(fourcc),
                        self.settings.device,
                        err
                    );
                }
            }
        }

        let applied = negotiated.ok_or_else(|| {
            self.unavailable("no RGB3 or YUYV format on", "unsupported pixel formats")
        })?;
        self.format = PixelFormat::from_fourcc(&applied.fourcc.repr).unwrap_or(PixelFormat::Rgb24);
        self.active_width = applied.width;
        self.active_height = applied.height;
        self.stride = applied.stride;

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    self.settings.device,
                    err
                );
            }
        }
        Ok(())
    }
}

impl CameraSource for V4l2Camera {
    fn device(&self) -> &str {
        &self.settings.device
    }

    fn open(&mut self) -> Result<StreamInfo> {
        use v4l::buffer::Type;

        if self.state.is_some() {
            return Ok(StreamInfo {
                device: self.settings.device.clone(),
                width: self.active_width,
                height: self.active_height,
            });
        }

        let device = v4l::Device::with_path(&self.settings.device)
            .map_err(|e| self.unavailable("open", e))?;
        self.negotiate(&device)?;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
            },
        }
        .try_build()
        .map_err(|e| self.unavailable("create buffer stream for", e))?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: opened {} ({}x{} {:?})",
            self.settings.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(StreamInfo {
            device: self.settings.device.clone(),
            width: self.active_width,
            height: self.active_height,
        })
    }

    fn current_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, stride, format) =
            (self.active_width, self.active_height, self.stride, self.format);
        let device = self.settings.device.clone();
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| DetectError::StreamEnded(format!("{} is not open", device)))?;
        let rgb = state.with_mut(|fields| {
            let (buf, _meta) = fields
                .stream
                .next()
                .map_err(|e| DetectError::StreamEnded(format!("capture from {}: {}", device, e)))?;
            normalize_to_rgb(buf, width, height, stride, format)
        })?;

        let sequence = self.frame_count;
        self.frame_count += 1;
        Frame::from_rgb(width, height, rgb, sequence)
    }

    fn release(&mut self) {
        // Dropping the state stops streaming and closes the device node.
        if self.state.take().is_some() {
            log::info!(
                "V4l2Camera: released {} after {} frames",
                self.settings.device,
                self.frame_count
            );
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.release();
    }
}
