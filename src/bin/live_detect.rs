//! live_detect - run the detection loop against a camera and draw the results.
//!
//! The annotated surface can be written to an image file with `--snapshot`;
//! otherwise frames are drawn in memory and only logged. Ctrl-C stops the
//! loop after the current iteration.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use live_detect::camera::camera_for;
use live_detect::config::LiveDetectConfig;
use live_detect::detect::{BackendRegistry, ModelRef};
use live_detect::overlay::{FrameSink, NullSink, Overlay, SnapshotSink};
use live_detect::pipeline::{DetectionLoop, FramePacer, LoopContext, StopReason};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "live_detect", version, about = "Real-time object detection overlay")]
struct Args {
    /// Config file (TOML or JSON). Falls back to LIVE_DETECT_CONFIG.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Camera device (/dev/videoN or stub://name)
    #[arg(long)]
    device: Option<String>,

    /// Model location (path, http(s) URL or stub://name)
    #[arg(long)]
    model: Option<String>,

    /// Inference backend (cpu|stub|tract)
    #[arg(long)]
    backend: Option<String>,

    /// Draw boxes scoring strictly above this value
    #[arg(long)]
    threshold: Option<f32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Write the annotated surface to this image file
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// Write a snapshot every N drawn frames
    #[arg(long, default_value_t = 30, value_name = "N")]
    snapshot_every: u64,

    /// Stop after this many iterations
    #[arg(long, value_name = "N")]
    max_frames: Option<u64>,

    /// List the backends compiled into this build and exit
    #[arg(long)]
    list_backends: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(
        ui::UiMode::parse(&args.ui),
        std::io::stderr().is_terminal(),
        std::env::var_os("RUST_LOG").is_some(),
    );

    let config = {
        let _stage = ui.stage("Load configuration");
        load_config(&args)?
    };

    let mut registry = BackendRegistry::with_builtin(&config.model);
    if args.list_backends {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let model = ModelRef::parse(&config.model.uri)?;
    let loader = registry.take(&config.model.backend)?;
    let camera = camera_for(&config.camera)?;
    let sink: Box<dyn FrameSink> = match &args.snapshot {
        Some(path) => {
            log::info!(
                "writing snapshots to {} every {} frames",
                path.display(),
                args.snapshot_every
            );
            Box::new(SnapshotSink::new(path, args.snapshot_every))
        }
        None => Box::new(NullSink),
    };

    let ctx = LoopContext::new(
        camera,
        loader,
        model,
        Overlay::new(config.overlay.clone()),
        Box::new(FramePacer::new(config.camera.target_fps)),
    )
    .with_sink(sink);
    let mut detection = DetectionLoop::new(ctx, config.loop_settings.clone());

    let stop = detection.stop_handle();
    ctrlc::set_handler(move || stop.request_stop())
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    {
        let stage = ui.stage("Open camera and load model");
        if let Err(err) = detection.start() {
            stage.fail();
            return Err(anyhow!("startup failed: {}", err));
        }
    }

    log::info!(
        "live_detect running on {} at {} fps (Ctrl-C to stop)",
        config.camera.device,
        config.camera.target_fps
    );
    let reason = detection.run_until(args.max_frames);

    let stats = detection.stats();
    log::info!(
        "live_detect finished: {} iterations, {} frames drawn, {} boxes, {} errors",
        stats.iterations,
        stats.frames_drawn,
        stats.boxes_drawn,
        stats.errors
    );

    match reason {
        Some(StopReason::TooManyErrors { count, last_error }) => Err(anyhow!(
            "stopped after {} consecutive errors, last: {}",
            count,
            last_error
        )),
        _ => Ok(()),
    }
}

fn load_config(args: &Args) -> Result<LiveDetectConfig> {
    let mut config = match &args.config {
        Some(path) => LiveDetectConfig::load_from(Some(path))?,
        None => LiveDetectConfig::load()?,
    };
    if let Some(device) = &args.device {
        config.camera.device = device.clone();
    }
    if let Some(fps) = args.fps {
        config.camera.target_fps = fps;
    }
    if let Some(model) = &args.model {
        config.model.uri = model.clone();
    }
    if let Some(backend) = &args.backend {
        config.model.backend = backend.clone();
    }
    if let Some(threshold) = args.threshold {
        config.overlay.confidence_threshold = threshold;
    }
    config.validate()?;
    Ok(config)
}
