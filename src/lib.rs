//! Live object detection overlay.
//!
//! This crate captures frames from a camera, runs an object detection model
//! on each one and draws the frame plus labelled bounding boxes onto an
//! overlay surface, one frame at a time.
//!
//! # Architecture
//!
//! The loop holds two guarantees by construction:
//!
//! 1. **No overlapping iterations**: the next frame is scheduled only after
//!    the current one has been drawn.
//! 2. **No silent stalls**: a failed iteration either schedules the next one
//!    or stops the loop with a reason.
//!
//! # Module Structure
//!
//! - `camera`: Frame sources (V4L2 devices, synthetic `stub://` cameras)
//! - `detect`: Detector backends, model references and the backend registry
//! - `overlay`: Drawing surface, box/label rendering and frame sinks
//! - `pipeline`: The detection loop and its schedulers
//! - `config`: File and environment configuration

pub mod camera;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod pipeline;

pub use camera::{camera_for, CameraSettings, CameraSource, StreamInfo, SyntheticCamera};
pub use config::{LiveDetectConfig, ModelSettings};
pub use detect::{
    BackendRegistry, Detection, DetectionBatch, Detector, ModelLoader, ModelRef, NormalizedBox,
    PixelRect,
};
pub use error::{DetectError, Result};
pub use frame::Frame;
pub use overlay::{FrameSink, Overlay, OverlaySettings};
pub use pipeline::{
    DetectionLoop, FramePacer, FrameToken, Iteration, LoopContext, LoopSettings, LoopState,
    ManualScheduler, Scheduler, StopHandle, StopReason,
};
