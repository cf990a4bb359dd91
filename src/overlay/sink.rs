use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::error::{DetectError, Result};

/// Receives the finished surface after each drawn iteration.
pub trait FrameSink {
    fn present(&mut self, surface: &RgbImage, sequence: u64) -> Result<()>;
}

/// Discards every frame.
#[derive(Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _surface: &RgbImage, _sequence: u64) -> Result<()> {
        Ok(())
    }
}

/// Writes the annotated surface to an image file every `every` frames.
///
/// The format follows the file extension (`.png`, `.jpg`, ...). Each write
/// replaces the previous snapshot.
pub struct SnapshotSink {
    path: PathBuf,
    every: u64,
    presented: u64,
    written: u64,
}

impl SnapshotSink {
    pub fn new(path: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
            presented: 0,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshots_written(&self) -> u64 {
        self.written
    }
}

impl FrameSink for SnapshotSink {
    fn present(&mut self, surface: &RgbImage, sequence: u64) -> Result<()> {
        let due = self.presented % self.every == 0;
        self.presented += 1;
        if !due {
            return Ok(());
        }
        surface.save(&self.path).map_err(|e| {
            DetectError::Render(format!("write snapshot {}: {}", self.path.display(), e))
        })?;
        self.written += 1;
        log::debug!(
            "snapshot of frame {} written to {}",
            sequence,
            self.path.display()
        );
        Ok(())
    }
}
