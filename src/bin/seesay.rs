//! seesay - speak what the camera sees
//!
//! This binary:
//! 1. Opens the configured frame source (V4L2 device or stub://)
//! 2. Loads the configured detector backend
//! 3. Starts the speech engine (on a worker thread unless --foreground-speech)
//! 4. Runs the perception loop until q + Enter, Ctrl-C, or --max-frames

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use seesay::config::{SeesayConfig, SpeechEngine, SpeechSettings};
use seesay::{
    open_source, Announcer, AnnouncerWorker, BackendRegistry, ConsoleAnnouncer, DetectorBackend,
    EspeakAnnouncer, NotificationPolicy, PerceptionLoop, ShutdownFlag, StubBackend,
};

const QUIT_KEY: char = 'q';

#[derive(Parser, Debug)]
#[command(author, version, about = "Announce objects seen by a camera")]
struct Args {
    /// Frame source: a V4L2 device path or stub://<name>[?scene=N&drop=P].
    #[arg(long, env = "SEESAY_SOURCE")]
    source: Option<String>,

    /// Capture width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Capture height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Detector backend (stub, tract). Defaults to tract when a model is set.
    #[arg(long, env = "SEESAY_DETECTOR")]
    detector: Option<String>,

    /// ONNX model path for the tract backend.
    #[arg(long, env = "SEESAY_MODEL")]
    model: Option<PathBuf>,

    /// Label vocabulary file (one class name per line).
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Minimum detection confidence.
    #[arg(long)]
    threshold: Option<f32>,

    /// Speech rate in words per minute.
    #[arg(long, env = "SEESAY_SPEECH_RATE")]
    rate: Option<u32>,

    /// Speech engine (espeak, console).
    #[arg(long, env = "SEESAY_SPEECH_ENGINE")]
    speech_engine: Option<String>,

    /// Speak on the capture thread, pausing the preview while speaking.
    #[arg(long)]
    foreground_speech: bool,

    /// Seconds before the same label may be announced again.
    #[arg(long, env = "SEESAY_COOLDOWN_SECS")]
    cooldown: Option<f64>,

    /// Write the annotated preview to this JPEG file.
    #[arg(long, env = "SEESAY_PREVIEW_PATH")]
    preview: Option<PathBuf>,

    /// Stop after this many cycles.
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn apply(&self, cfg: &mut SeesayConfig) -> Result<()> {
        if let Some(source) = &self.source {
            cfg.source.url = source.clone();
        }
        if let Some(width) = self.width {
            cfg.source.width = width;
        }
        if let Some(height) = self.height {
            cfg.source.height = height;
        }
        if let Some(detector) = &self.detector {
            cfg.detector.backend = Some(detector.clone());
        }
        if let Some(model) = &self.model {
            cfg.detector.model_path = Some(model.clone());
        }
        if let Some(labels) = &self.labels {
            cfg.detector.labels_path = Some(labels.clone());
        }
        if let Some(threshold) = self.threshold {
            cfg.detector.confidence_threshold = threshold;
        }
        if let Some(rate) = self.rate {
            cfg.speech.rate_wpm = rate;
        }
        if let Some(engine) = &self.speech_engine {
            cfg.speech.engine = SpeechEngine::parse(engine)?;
        }
        if self.foreground_speech {
            cfg.speech.background = false;
        }
        if let Some(cooldown) = self.cooldown {
            cfg.cooldown = std::time::Duration::try_from_secs_f64(cooldown)
                .map_err(|_| anyhow!("--cooldown must be a non-negative number of seconds"))?;
        }
        if let Some(preview) = &self.preview {
            cfg.preview_path = Some(preview.clone());
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SeesayConfig::load()?;
    args.apply(&mut cfg)?;
    cfg.validate()?;

    // Fatal startup: no frames are processed unless every collaborator is up.
    let mut source = open_source(&cfg.source)?;
    source.connect()?;
    let detector = build_detector(&cfg)?;
    let announcer = build_announcer(&cfg.speech)?;

    let shutdown = ShutdownFlag::new();
    shutdown.install_ctrlc()?;
    shutdown.spawn_quit_key_listener(QUIT_KEY)?;

    let detector_name = detector.name();
    let announcer_name = announcer.name();
    let pipeline = PerceptionLoop::new(source, detector, announcer)
        .with_policy(NotificationPolicy::new(cfg.cooldown))
        .with_options(cfg.loop_options(args.max_frames));
    let mut pipeline = attach_preview(pipeline, &cfg)?;

    log::info!(
        "seesay running: source={} detector={} speech={} (background={}), {} + Enter quits",
        cfg.source.url,
        detector_name,
        announcer_name,
        cfg.speech.background,
        QUIT_KEY
    );

    let stats = pipeline.run(&shutdown)?;
    log::info!(
        "frames={} capture_failures={} detector_failures={} announcements={} speech_failures={}",
        stats.frames_processed,
        stats.capture_failures,
        stats.detector_failures,
        stats.announcements,
        stats.speech_failures
    );
    Ok(())
}

fn build_detector(cfg: &SeesayConfig) -> Result<Box<dyn DetectorBackend>> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());

    #[cfg(feature = "backend-tract")]
    {
        if let Some(model_path) = &cfg.detector.model_path {
            let size = cfg.detector.input_size;
            let mut backend = seesay::detect::TractBackend::new(model_path, size, size)?
                .with_threshold(cfg.detector.confidence_threshold);
            if let Some(labels_path) = &cfg.detector.labels_path {
                backend = backend.with_labels(seesay::detect::load_labels(labels_path)?);
            }
            registry.register(backend);
        }
    }

    let backend = cfg.detector.backend_name();
    if !registry.contains(backend) && backend == "tract" {
        return Err(anyhow!(
            "the tract detector requires building with the backend-tract feature"
        ));
    }
    registry.set_default(backend)?;
    registry.take_default()
}

fn build_announcer(speech: &SpeechSettings) -> Result<Box<dyn Announcer>> {
    let engine: Box<dyn Announcer> = match speech.engine {
        SpeechEngine::Espeak => Box::new(EspeakAnnouncer::new(speech.rate_wpm)?),
        SpeechEngine::Console => Box::new(ConsoleAnnouncer),
    };
    if speech.background {
        Ok(Box::new(AnnouncerWorker::spawn(engine)?))
    } else {
        Ok(engine)
    }
}

fn attach_preview(pipeline: PerceptionLoop, cfg: &SeesayConfig) -> Result<PerceptionLoop> {
    let Some(path) = &cfg.preview_path else {
        return Ok(pipeline);
    };
    #[cfg(feature = "preview-jpeg")]
    {
        log::info!("writing preview to {}", path.display());
        Ok(pipeline.with_preview(seesay::render::JpegPreview::new(path)))
    }
    #[cfg(not(feature = "preview-jpeg"))]
    {
        Err(anyhow!(
            "preview to {} requires the preview-jpeg feature",
            path.display()
        ))
    }
}
