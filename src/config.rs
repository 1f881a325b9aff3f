use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::announce::DEFAULT_RATE_WPM;
use crate::ingest::SourceConfig;
use crate::pipeline::LoopOptions;
use crate::policy::DEFAULT_COOLDOWN;

const DEFAULT_SOURCE_URL: &str = "/dev/video0";
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_MODEL_INPUT: u32 = 640;
const MIN_RATE_WPM: u32 = 80;
const MAX_RATE_WPM: u32 = 450;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SeesayConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    speech: Option<SpeechConfigFile>,
    policy: Option<PolicyConfigFile>,
    preview: Option<PreviewConfigFile>,
    #[serde(rename = "loop")]
    loop_: Option<LoopConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SpeechConfigFile {
    engine: Option<String>,
    rate_wpm: Option<u32>,
    background: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PolicyConfigFile {
    cooldown_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PreviewConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LoopConfigFile {
    capture_backoff_max_ms: Option<u64>,
    max_consecutive_detector_failures: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SeesayConfig {
    pub source: SourceConfig,
    pub detector: DetectorSettings,
    pub speech: SpeechSettings,
    pub cooldown: Duration,
    pub preview_path: Option<PathBuf>,
    pub capture_backoff_max: Duration,
    pub max_consecutive_detector_failures: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Explicit backend name. When unset, see [`DetectorSettings::backend_name`].
    pub backend: Option<String>,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    /// Square model input edge in pixels.
    pub input_size: u32,
}

impl DetectorSettings {
    /// The explicit backend, else `tract` when a model is configured, else `stub`.
    pub fn backend_name(&self) -> &str {
        match (&self.backend, &self.model_path) {
            (Some(backend), _) => backend,
            (None, Some(_)) => "tract",
            (None, None) => "stub",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEngine {
    Espeak,
    Console,
}

impl SpeechEngine {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "espeak" | "espeak-ng" => Ok(Self::Espeak),
            "console" => Ok(Self::Console),
            other => Err(anyhow!(
                "unknown speech engine '{}' (expected espeak or console)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub engine: SpeechEngine,
    pub rate_wpm: u32,
    /// Speak on a worker thread instead of blocking the loop.
    pub background: bool,
}

impl Default for SeesayConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                url: DEFAULT_SOURCE_URL.to_string(),
                target_fps: DEFAULT_SOURCE_FPS,
                width: DEFAULT_SOURCE_WIDTH,
                height: DEFAULT_SOURCE_HEIGHT,
            },
            detector: DetectorSettings {
                backend: None,
                model_path: None,
                labels_path: None,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
                input_size: DEFAULT_MODEL_INPUT,
            },
            speech: SpeechSettings {
                engine: SpeechEngine::Espeak,
                rate_wpm: DEFAULT_RATE_WPM,
                background: true,
            },
            cooldown: DEFAULT_COOLDOWN,
            preview_path: None,
            capture_backoff_max: Duration::ZERO,
            max_consecutive_detector_failures: 0,
        }
    }
}

impl SeesayConfig {
    /// Defaults, then the file named by `SEESAY_CONFIG`, then environment
    /// overrides. Call [`SeesayConfig::validate`] after any further
    /// overrides (CLI flags).
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SEESAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: SeesayConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(source) = file.source {
            if let Some(url) = source.url {
                cfg.source.url = url;
            }
            cfg.source.target_fps = source.target_fps.unwrap_or(cfg.source.target_fps);
            cfg.source.width = source.width.unwrap_or(cfg.source.width);
            cfg.source.height = source.height.unwrap_or(cfg.source.height);
        }
        if let Some(detector) = file.detector {
            if detector.backend.is_some() {
                cfg.detector.backend = detector.backend;
            }
            cfg.detector.model_path = detector.model_path;
            cfg.detector.labels_path = detector.labels_path;
            cfg.detector.confidence_threshold = detector
                .confidence_threshold
                .unwrap_or(cfg.detector.confidence_threshold);
            cfg.detector.input_size = detector.input_size.unwrap_or(cfg.detector.input_size);
        }
        if let Some(speech) = file.speech {
            if let Some(engine) = speech.engine.as_deref() {
                cfg.speech.engine = SpeechEngine::parse(engine)?;
            }
            cfg.speech.rate_wpm = speech.rate_wpm.unwrap_or(cfg.speech.rate_wpm);
            cfg.speech.background = speech.background.unwrap_or(cfg.speech.background);
        }
        if let Some(secs) = file.policy.and_then(|policy| policy.cooldown_secs) {
            cfg.cooldown = cooldown_from_secs(secs)?;
        }
        cfg.preview_path = file.preview.and_then(|preview| preview.path);
        if let Some(loop_) = file.loop_ {
            if let Some(ms) = loop_.capture_backoff_max_ms {
                cfg.capture_backoff_max = Duration::from_millis(ms);
            }
            cfg.max_consecutive_detector_failures = loop_
                .max_consecutive_detector_failures
                .unwrap_or(cfg.max_consecutive_detector_failures);
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SEESAY_SOURCE") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(backend) = std::env::var("SEESAY_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = Some(backend.trim().to_string());
            }
        }
        if let Ok(path) = std::env::var("SEESAY_MODEL") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(engine) = std::env::var("SEESAY_SPEECH_ENGINE") {
            if !engine.trim().is_empty() {
                self.speech.engine = SpeechEngine::parse(&engine)?;
            }
        }
        if let Ok(rate) = std::env::var("SEESAY_SPEECH_RATE") {
            if !rate.trim().is_empty() {
                self.speech.rate_wpm = rate.trim().parse().map_err(|_| {
                    anyhow!("SEESAY_SPEECH_RATE must be an integer words per minute")
                })?;
            }
        }
        if let Ok(cooldown) = std::env::var("SEESAY_COOLDOWN_SECS") {
            if !cooldown.trim().is_empty() {
                let secs: f64 = cooldown
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("SEESAY_COOLDOWN_SECS must be a number of seconds"))?;
                self.cooldown = cooldown_from_secs(secs)?;
            }
        }
        if let Ok(path) = std::env::var("SEESAY_PREVIEW_PATH") {
            if !path.trim().is_empty() {
                self.preview_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if !(MIN_RATE_WPM..=MAX_RATE_WPM).contains(&self.speech.rate_wpm) {
            return Err(anyhow!(
                "speech rate must be within {}..={} words per minute",
                MIN_RATE_WPM,
                MAX_RATE_WPM
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within 0..=1"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        let backend = self.detector.backend_name();
        if backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract detector requires a model path"));
        }
        // Stub labels are a hash of the pixels; on a live camera every frame
        // would announce something new.
        if backend == "stub" && !self.source.url.starts_with("stub://") {
            return Err(anyhow!(
                "the stub detector only runs against stub:// sources, not {} (set a model path)",
                self.source.url
            ));
        }
        Ok(())
    }

    pub fn loop_options(&self, max_cycles: Option<u64>) -> LoopOptions {
        LoopOptions {
            capture_backoff_max: self.capture_backoff_max,
            max_consecutive_detector_failures: self.max_consecutive_detector_failures,
            max_cycles,
        }
    }
}

fn cooldown_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("cooldown must be a non-negative number of seconds"))
}

fn read_config_file(path: &Path) -> Result<SeesayConfigFile> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_camera_setup() -> Result<()> {
        let mut cfg = SeesayConfig::default();
        cfg.detector.model_path = Some(PathBuf::from("yolov5s.onnx"));
        cfg.validate()?;
        assert_eq!(cfg.detector.backend_name(), "tract");
        assert_eq!(cfg.source.url, "/dev/video0");
        assert_eq!((cfg.source.width, cfg.source.height), (640, 480));
        assert_eq!(cfg.speech.rate_wpm, 150);
        assert_eq!(cfg.cooldown, Duration::from_secs(5));
        assert!(cfg.speech.background);
        Ok(())
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let valid = || {
            let mut cfg = SeesayConfig::default();
            cfg.source.url = "stub://desk".to_string();
            cfg
        };
        assert!(valid().validate().is_ok());

        let mut cfg = valid();
        cfg.speech.rate_wpm = 20;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.detector.backend = Some("tract".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.source.width = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stub_detector_is_limited_to_stub_sources() {
        let mut cfg = SeesayConfig::default();
        assert_eq!(cfg.detector.backend_name(), "stub");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("stub:// sources"));

        cfg.detector.backend = Some("stub".to_string());
        assert!(cfg.validate().is_err());

        cfg.source.url = "stub://kitchen".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn model_path_selects_tract_unless_backend_is_explicit() {
        let mut cfg = SeesayConfig::default();
        cfg.detector.model_path = Some(PathBuf::from("yolov5s.onnx"));
        assert_eq!(cfg.detector.backend_name(), "tract");

        cfg.detector.backend = Some("stub".to_string());
        assert_eq!(cfg.detector.backend_name(), "stub");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_cooldown_is_rejected() {
        assert!(cooldown_from_secs(-1.0).is_err());
        assert_eq!(cooldown_from_secs(2.5).unwrap(), Duration::from_millis(2_500));
    }

    #[test]
    fn speech_engine_names() {
        assert_eq!(SpeechEngine::parse("espeak-ng").unwrap(), SpeechEngine::Espeak);
        assert_eq!(SpeechEngine::parse(" Console ").unwrap(), SpeechEngine::Console);
        assert!(SpeechEngine::parse("festival").is_err());
    }

    #[test]
    fn toml_file_sections_are_applied() -> Result<()> {
        let file: SeesayConfigFile = toml::from_str(
            r#"
            [source]
            url = "stub://desk"
            width = 320

            [speech]
            engine = "console"
            background = false

            [loop]
            capture_backoff_max_ms = 250
            "#,
        )?;
        let cfg = SeesayConfig::from_file(file)?;
        assert_eq!(cfg.source.url, "stub://desk");
        assert_eq!(cfg.source.width, 320);
        assert_eq!(cfg.source.height, 480);
        assert_eq!(cfg.speech.engine, SpeechEngine::Console);
        assert!(!cfg.speech.background);
        assert_eq!(cfg.capture_backoff_max, Duration::from_millis(250));
        Ok(())
    }
}
