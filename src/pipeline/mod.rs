//! The detection loop.
//!
//! `DetectionLoop` is a two-state machine (Stopped, Running) driven by a
//! `Scheduler`. `start` acquires the camera and the model; each `tick` then
//! runs one iteration:
//!
//! 1. Capture the current frame
//! 2. Clear the overlay and paint the frame
//! 3. Run the detector
//! 4. Stroke boxes scoring above the threshold
//! 5. Present the surface and schedule the next iteration
//!
//! The next iteration is requested only after the current one finished
//! drawing, so slow inference lowers the frame rate instead of queueing
//! frames. An iteration that fails is logged and skipped; the loop keeps
//! going until `max_consecutive_errors` failures in a row stop it.

mod scheduler;

pub use scheduler::{FramePacer, FrameToken, ManualScheduler, Scheduler};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::camera::CameraSource;
use crate::detect::{Detector, ModelLoader, ModelRef};
use crate::error::{DetectError, Result};
use crate::overlay::{FrameSink, NullSink, Overlay};

const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq)]
pub struct LoopSettings {
    /// Stop after this many failed iterations in a row. 0 never stops.
    pub max_consecutive_errors: u32,
    /// Results of slower inference calls are discarded.
    pub inference_timeout: Option<Duration>,
    pub stats_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 30,
            inference_timeout: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` or the stop handle.
    Requested,
    /// Too many failed iterations in a row; carries the last error.
    TooManyErrors { count: u32, last_error: String },
    /// The iteration limit passed to `run_until` was reached.
    IterationLimit,
    /// The scheduler had nothing left to run.
    SchedulerIdle,
}

/// Thread-safe stop request, e.g. for a Ctrl-C handler.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Everything a loop needs, built once by the caller.
pub struct LoopContext {
    pub camera: Box<dyn CameraSource>,
    pub loader: Box<dyn ModelLoader>,
    pub model: ModelRef,
    pub overlay: Overlay,
    pub scheduler: Box<dyn Scheduler>,
    pub sink: Box<dyn FrameSink>,
}

impl LoopContext {
    pub fn new(
        camera: Box<dyn CameraSource>,
        loader: Box<dyn ModelLoader>,
        model: ModelRef,
        overlay: Overlay,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        Self {
            camera,
            loader,
            model,
            overlay,
            scheduler,
            sink: Box::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Outcome of one `tick`.
#[derive(Debug)]
pub enum Iteration {
    /// The frame was drawn with `drawn` of `detections` boxes.
    Drawn {
        sequence: u64,
        detections: usize,
        drawn: usize,
    },
    /// The iteration failed and the next one was scheduled.
    Recovered(DetectError),
    /// The loop is now stopped.
    Stopped(StopReason),
    /// Stale token or loop not running; nothing happened.
    Skipped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub frames_drawn: u64,
    pub boxes_drawn: u64,
    pub errors: u64,
    pub consecutive_errors: u32,
}

pub struct DetectionLoop {
    ctx: LoopContext,
    settings: LoopSettings,
    state: LoopState,
    detector: Option<Box<dyn Detector>>,
    next_token: u64,
    pending: Option<FrameToken>,
    stop: StopHandle,
    stop_reason: Option<StopReason>,
    stats: LoopStats,
    last_stats_log: Instant,
}

impl DetectionLoop {
    pub fn new(ctx: LoopContext, settings: LoopSettings) -> Self {
        Self {
            ctx,
            settings,
            state: LoopState::Stopped,
            detector: None,
            next_token: 0,
            pending: None,
            stop: StopHandle::default(),
            stop_reason: None,
            stats: LoopStats::default(),
            last_stats_log: Instant::now(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn overlay(&self) -> &Overlay {
        &self.ctx.overlay
    }

    pub fn camera_is_open(&self) -> bool {
        self.ctx.camera.is_open()
    }

    /// Acquire the camera, load the model, size the overlay and schedule the
    /// first iteration.
    ///
    /// Any failure releases the camera and is returned; the loop stays
    /// Stopped. The model is not loaded when the camera cannot be opened.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            log::warn!("detection loop already running");
            return Ok(());
        }
        self.stop.reset();
        self.stop_reason = None;
        self.stats.consecutive_errors = 0;

        let info = match self.ctx.camera.open() {
            Ok(info) => info,
            Err(err) => {
                self.ctx.camera.release();
                return Err(err);
            }
        };
        log::info!(
            "camera {} streaming at {}x{}",
            info.device,
            info.width,
            info.height
        );

        if let Err(err) = self.acquire_model_and_surface() {
            self.detector = None;
            self.ctx.camera.release();
            return Err(err);
        }

        self.state = LoopState::Running;
        log::info!(
            "detection loop running (threshold {:.2})",
            self.ctx.overlay.threshold()
        );
        self.schedule_next();
        Ok(())
    }

    fn acquire_model_and_surface(&mut self) -> Result<()> {
        log::info!(
            "loading model {} with backend {}",
            self.ctx.model,
            self.ctx.loader.name()
        );
        let started = Instant::now();
        let mut detector = self.ctx.loader.load(&self.ctx.model)?;
        detector.warm_up()?;
        log::info!(
            "model ready ({} backend, {} ms)",
            detector.name(),
            started.elapsed().as_millis()
        );
        self.detector = Some(detector);

        let first = self.ctx.camera.current_frame()?;
        self.ctx.overlay.attach(first.width(), first.height())?;
        Ok(())
    }

    /// Stop the loop and release the camera. Pending tokens become no-ops.
    pub fn stop(&mut self) {
        self.stop_with(StopReason::Requested);
    }

    fn stop_with(&mut self, reason: StopReason) {
        self.pending = None;
        self.ctx.scheduler.cancel();
        self.ctx.camera.release();
        self.detector = None;
        if self.state == LoopState::Running {
            self.state = LoopState::Stopped;
            log::info!(
                "detection loop stopped: {:?} ({} iterations, {} errors)",
                reason,
                self.stats.iterations,
                self.stats.errors
            );
            self.stop_reason = Some(reason);
        }
    }

    fn schedule_next(&mut self) {
        let token = FrameToken(self.next_token);
        self.next_token += 1;
        self.pending = Some(token);
        self.ctx.scheduler.schedule(token);
    }

    /// Run the iteration `token` was issued for.
    pub fn tick(&mut self, token: FrameToken) -> Iteration {
        if !self.is_running() || self.pending != Some(token) {
            log::debug!("ignoring frame token {}", token.id());
            return Iteration::Skipped;
        }
        self.pending = None;

        if self.stop.is_stop_requested() {
            self.stop_with(StopReason::Requested);
            return Iteration::Stopped(StopReason::Requested);
        }

        self.stats.iterations += 1;
        let outcome = match self.iterate() {
            Ok(Some((sequence, detections, drawn))) => {
                self.stats.frames_drawn += 1;
                self.stats.boxes_drawn += drawn as u64;
                self.stats.consecutive_errors = 0;
                self.schedule_next();
                Iteration::Drawn {
                    sequence,
                    detections,
                    drawn,
                }
            }
            Ok(None) => {
                log::info!("stop requested during inference, discarding results");
                self.stop_with(StopReason::Requested);
                Iteration::Stopped(StopReason::Requested)
            }
            Err(err) => self.recover(err),
        };
        self.maybe_log_stats();
        outcome
    }

    fn recover(&mut self, err: DetectError) -> Iteration {
        self.stats.errors += 1;
        self.stats.consecutive_errors += 1;
        let level = if err.is_per_iteration() {
            log::Level::Warn
        } else {
            log::Level::Error
        };
        log::log!(
            level,
            "iteration {} failed ({} in a row): {}",
            self.stats.iterations,
            self.stats.consecutive_errors,
            err
        );

        let limit = self.settings.max_consecutive_errors;
        if limit > 0 && self.stats.consecutive_errors >= limit {
            let reason = StopReason::TooManyErrors {
                count: self.stats.consecutive_errors,
                last_error: err.to_string(),
            };
            log::error!("giving up after {} consecutive errors", limit);
            self.stop_with(reason.clone());
            return Iteration::Stopped(reason);
        }
        self.schedule_next();
        Iteration::Recovered(err)
    }

    /// One pass: frame, draw, infer, boxes, present. `None` when a stop was
    /// requested while inference ran.
    fn iterate(&mut self) -> Result<Option<(u64, usize, usize)>> {
        let frame = self.ctx.camera.current_frame()?;
        self.ctx.overlay.clear()?;
        self.ctx.overlay.draw_frame(&frame)?;

        let detector = self
            .detector
            .as_mut()
            .ok_or_else(|| DetectError::Inference("no model loaded".to_string()))?;
        let started = Instant::now();
        let batch = detector.infer(&frame)?;
        let elapsed = started.elapsed();

        if self.stop.is_stop_requested() {
            return Ok(None);
        }
        if let Some(timeout) = self.settings.inference_timeout {
            if elapsed > timeout {
                return Err(DetectError::Inference(format!(
                    "inference took {} ms, over the {} ms budget",
                    elapsed.as_millis(),
                    timeout.as_millis()
                )));
            }
        }

        let drawn = self.ctx.overlay.draw_detections(&batch)?;
        if let Some(surface) = self.ctx.overlay.surface() {
            self.ctx.sink.present(surface, frame.sequence())?;
        }
        log::debug!(
            "frame {}: {} detections, {} drawn, inference {} ms",
            frame.sequence(),
            batch.len(),
            drawn.len(),
            elapsed.as_millis()
        );
        Ok(Some((frame.sequence(), batch.len(), drawn.len())))
    }

    fn maybe_log_stats(&mut self) {
        if self.last_stats_log.elapsed() < self.settings.stats_interval {
            return;
        }
        log::info!(
            "loop running={} iterations={} drawn={} boxes={} errors={}",
            self.is_running(),
            self.stats.iterations,
            self.stats.frames_drawn,
            self.stats.boxes_drawn,
            self.stats.errors
        );
        self.last_stats_log = Instant::now();
    }

    /// Drive iterations from the scheduler until the loop stops.
    pub fn run(&mut self) -> Option<StopReason> {
        self.run_until(None)
    }

    /// Like `run`, stopping after `max_iterations` iterations when given.
    pub fn run_until(&mut self, max_iterations: Option<u64>) -> Option<StopReason> {
        let mut executed = 0u64;
        while self.is_running() {
            if max_iterations.is_some_and(|max| executed >= max) {
                self.stop_with(StopReason::IterationLimit);
                break;
            }
            if self.stop.is_stop_requested() {
                self.stop_with(StopReason::Requested);
                break;
            }
            let Some(token) = self.ctx.scheduler.next() else {
                self.stop_with(StopReason::SchedulerIdle);
                break;
            };
            if !matches!(self.tick(token), Iteration::Skipped) {
                executed += 1;
            }
        }
        self.stop_reason.clone()
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.ctx.camera.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticCamera;
    use crate::detect::{CpuLoader, StubLoader};
    use crate::overlay::OverlaySettings;

    fn synthetic_loop(scheduler: &ManualScheduler, camera: SyntheticCamera) -> DetectionLoop {
        let ctx = LoopContext::new(
            Box::new(camera),
            Box::new(StubLoader::default()),
            ModelRef::Builtin("model".to_string()),
            Overlay::new(OverlaySettings::default()),
            Box::new(scheduler.clone()),
        );
        DetectionLoop::new(ctx, LoopSettings::default())
    }

    #[test]
    fn starts_stopped() {
        let scheduler = ManualScheduler::new();
        let detection = synthetic_loop(&scheduler, SyntheticCamera::new("stub://t", 32, 24));
        assert_eq!(detection.state(), LoopState::Stopped);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn start_sizes_overlay_from_first_frame() -> Result<()> {
        let scheduler = ManualScheduler::new();
        let mut detection = synthetic_loop(&scheduler, SyntheticCamera::new("stub://t", 32, 24));
        detection.start()?;
        assert!(detection.is_running());
        assert_eq!(detection.overlay().dimensions(), Some((32, 24)));
        assert_eq!(scheduler.pending(), 1);
        Ok(())
    }

    #[test]
    fn iterations_reschedule_one_at_a_time() -> Result<()> {
        let scheduler = ManualScheduler::new();
        let mut detection = synthetic_loop(&scheduler, SyntheticCamera::new("stub://t", 32, 24));
        detection.start()?;

        for _ in 0..3 {
            let token = scheduler.pop().expect("pending token");
            let outcome = detection.tick(token);
            assert!(matches!(outcome, Iteration::Drawn { detections: 2, drawn: 1, .. }));
            assert_eq!(scheduler.pending(), 1);
        }
        assert_eq!(detection.stats().boxes_drawn, 3);
        Ok(())
    }

    #[test]
    fn stale_tokens_are_ignored() -> Result<()> {
        let scheduler = ManualScheduler::new();
        let mut detection = synthetic_loop(&scheduler, SyntheticCamera::new("stub://t", 32, 24));
        detection.start()?;
        let token = scheduler.pop().expect("first token");
        detection.tick(token);
        assert!(matches!(detection.tick(token), Iteration::Skipped));
        Ok(())
    }

    #[test]
    fn stream_end_recovers_then_gives_up() -> Result<()> {
        let scheduler = ManualScheduler::new();
        // One frame sizes the overlay, one is drawn, then the stream ends.
        let camera = SyntheticCamera::new("stub://t", 16, 16).with_frame_limit(2);
        let ctx = LoopContext::new(
            Box::new(camera),
            Box::new(CpuLoader::default()),
            ModelRef::Builtin("model".to_string()),
            Overlay::new(OverlaySettings::default()),
            Box::new(scheduler.clone()),
        );
        let settings = LoopSettings {
            max_consecutive_errors: 3,
            ..LoopSettings::default()
        };
        let mut detection = DetectionLoop::new(ctx, settings);
        detection.start()?;

        let reason = detection.run();
        assert!(matches!(
            reason,
            Some(StopReason::TooManyErrors { count: 3, .. })
        ));
        assert_eq!(detection.stats().frames_drawn, 1);
        assert_eq!(detection.stats().errors, 3);
        assert!(!detection.camera_is_open());
        assert_eq!(scheduler.pending(), 0);
        Ok(())
    }

    #[test]
    fn run_until_honours_iteration_limit() -> Result<()> {
        let scheduler = ManualScheduler::new();
        let mut detection = synthetic_loop(&scheduler, SyntheticCamera::new("stub://t", 32, 24));
        detection.start()?;
        assert_eq!(detection.run_until(Some(4)), Some(StopReason::IterationLimit));
        assert_eq!(detection.stats().iterations, 4);
        assert!(!detection.camera_is_open());
        Ok(())
    }

    #[test]
    fn stop_handle_is_observed_before_next_iteration() -> Result<()> {
        let scheduler = ManualScheduler::new();
        let mut detection = synthetic_loop(&scheduler, SyntheticCamera::new("stub://t", 32, 24));
        detection.start()?;
        detection.stop_handle().request_stop();

        let token = scheduler.pop().expect("pending token");
        assert!(matches!(
            detection.tick(token),
            Iteration::Stopped(StopReason::Requested)
        ));
        assert_eq!(detection.stats().iterations, 0);
        assert!(!detection.camera_is_open());
        Ok(())
    }

    #[test]
    fn loop_can_restart_after_stop() -> Result<()> {
        let scheduler = ManualScheduler::new();
        let mut detection = synthetic_loop(&scheduler, SyntheticCamera::new("stub://t", 32, 24));
        detection.start()?;
        detection.stop();
        assert_eq!(detection.stop_reason(), Some(&StopReason::Requested));

        detection.start()?;
        assert!(detection.is_running());
        assert!(detection.stop_reason().is_none());
        let token = scheduler.pop().expect("token after restart");
        assert!(matches!(detection.tick(token), Iteration::Drawn { .. }));
        Ok(())
    }
}
