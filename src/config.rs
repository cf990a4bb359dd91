use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::CameraSettings;
use crate::detect::TensorLayout;
use crate::overlay::OverlaySettings;
use crate::pipeline::LoopSettings;

const DEFAULT_DEVICE: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_MODEL_URI: &str = "stub://model";
const DEFAULT_BACKEND: &str = "cpu";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MODEL_CACHE: &str = ".live-detect/models";
const DEFAULT_THRESHOLD: f32 = 0.5;
const DEFAULT_LINE_WIDTH: u32 = 2;
const DEFAULT_BOX_COLOR: [u8; 3] = [255, 0, 0];
const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// Backends the configuration may name. Availability depends on build features.
pub const KNOWN_BACKENDS: [&str; 3] = ["cpu", "stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct LiveDetectConfigFile {
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    overlay: Option<OverlayConfigFile>,
    #[serde(rename = "loop")]
    loop_: Option<LoopConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    uri: Option<String>,
    backend: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    layout: Option<TensorLayout>,
    cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    confidence_threshold: Option<f32>,
    line_width: Option<u32>,
    box_color: Option<[u8; 3]>,
    color_by_class: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    max_consecutive_errors: Option<u32>,
    inference_timeout_ms: Option<u64>,
}

/// Where the model comes from and which backend runs it.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub uri: String,
    pub backend: String,
    pub input_width: u32,
    pub input_height: u32,
    pub layout: TensorLayout,
    pub cache_dir: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_MODEL_URI.to_string(),
            backend: DEFAULT_BACKEND.to_string(),
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            layout: TensorLayout::Nchw,
            cache_dir: PathBuf::from(DEFAULT_MODEL_CACHE),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveDetectConfig {
    pub camera: CameraSettings,
    pub model: ModelSettings,
    pub overlay: OverlaySettings,
    pub loop_settings: LoopSettings,
}

impl LiveDetectConfig {
    /// Load from `LIVE_DETECT_CONFIG` (if set), then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LIVE_DETECT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as `load`, with an explicit config file taking the place of `LIVE_DETECT_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LiveDetectConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_FPS),
        };

        let model_file = file.model.unwrap_or_default();
        let defaults = ModelSettings::default();
        let model = ModelSettings {
            uri: model_file.uri.unwrap_or(defaults.uri),
            backend: model_file.backend.unwrap_or(defaults.backend),
            input_width: model_file.input_width.unwrap_or(defaults.input_width),
            input_height: model_file.input_height.unwrap_or(defaults.input_height),
            layout: model_file.layout.unwrap_or(defaults.layout),
            cache_dir: model_file.cache_dir.unwrap_or(defaults.cache_dir),
        };

        let overlay_file = file.overlay.unwrap_or_default();
        let overlay = OverlaySettings {
            confidence_threshold: overlay_file
                .confidence_threshold
                .unwrap_or(DEFAULT_THRESHOLD),
            line_width: overlay_file.line_width.unwrap_or(DEFAULT_LINE_WIDTH),
            box_color: overlay_file.box_color.unwrap_or(DEFAULT_BOX_COLOR),
            color_by_class: overlay_file.color_by_class.unwrap_or(false),
        };

        let loop_file = file.loop_.unwrap_or_default();
        let loop_settings = LoopSettings {
            max_consecutive_errors: loop_file
                .max_consecutive_errors
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_ERRORS),
            inference_timeout: loop_file.inference_timeout_ms.map(Duration::from_millis),
            ..LoopSettings::default()
        };

        Self {
            camera,
            model,
            overlay,
            loop_settings,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = non_empty_env("LIVE_DETECT_DEVICE") {
            self.camera.device = device;
        }
        if let Some(fps) = non_empty_env("LIVE_DETECT_FPS") {
            self.camera.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("LIVE_DETECT_FPS must be a positive integer"))?;
        }
        if let Some(uri) = non_empty_env("LIVE_DETECT_MODEL") {
            self.model.uri = uri;
        }
        if let Some(backend) = non_empty_env("LIVE_DETECT_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(dir) = non_empty_env("LIVE_DETECT_MODEL_CACHE") {
            self.model.cache_dir = PathBuf::from(dir);
        }
        if let Some(threshold) = non_empty_env("LIVE_DETECT_THRESHOLD") {
            self.overlay.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("LIVE_DETECT_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(timeout) = non_empty_env("LIVE_DETECT_INFERENCE_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("LIVE_DETECT_INFERENCE_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.loop_settings.inference_timeout = Some(Duration::from_millis(millis));
        }
        Ok(())
    }

    /// Check ranges and names. Also run after command-line overrides.
    pub fn validate(&mut self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera.device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera.target_fps must be greater than zero"));
        }

        self.model.backend = self.model.backend.trim().to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.model.backend.as_str()) {
            return Err(anyhow!(
                "model.backend '{}' is not one of {}",
                self.model.backend,
                KNOWN_BACKENDS.join(", ")
            ));
        }
        if self.model.uri.trim().is_empty() {
            return Err(anyhow!("model.uri must not be empty"));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }

        let threshold = self.overlay.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "overlay.confidence_threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.overlay.line_width == 0 {
            return Err(anyhow!("overlay.line_width must be greater than zero"));
        }

        if self
            .loop_settings
            .inference_timeout
            .is_some_and(|timeout| timeout.is_zero())
        {
            return Err(anyhow!("loop.inference_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<LiveDetectConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
