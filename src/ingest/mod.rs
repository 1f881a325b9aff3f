//! Frame sources.
//!
//! This module provides the sources the perception loop pulls frames from:
//! - Synthetic scenes (`stub://` URLs, always available)
//! - USB/V4L2 devices such as `/dev/video0` (feature: ingest-v4l2)
//!
//! Every source produces RGB24 `Frame`s at (or near) the configured
//! resolution. A failed capture is reported as a `CaptureError`, which the
//! loop treats as transient; sources must stay usable after returning one.

use anyhow::{anyhow, Result};

use crate::error::CaptureError;
use crate::frame::Frame;

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Configuration shared by all frame sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Device path (e.g., "/dev/video0") or `stub://<name>[?options]`.
    pub url: String,
    /// Target frame rate. Zero disables pacing.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Capture statistics for health logging.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub source: String,
}

/// Provider of frames.
pub trait FrameSource {
    /// Acquire the underlying device. Failure here is fatal at startup.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. At most one attempt per call.
    fn capture(&mut self) -> Result<Frame, CaptureError>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        (**self).capture()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Open the source named by `config.url`, without connecting it.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())?));
    }
    if config.url.contains("://") {
        return Err(anyhow!(
            "unsupported frame source '{}' (expected a device path or stub://)",
            config.url
        ));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(config.clone())?))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow!(
            "capture from {} requires the ingest-v4l2 feature",
            config.url
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_source_accepts_stub_urls() -> Result<()> {
        let config = SourceConfig {
            url: "stub://desk".to_string(),
            target_fps: 0,
            width: 32,
            height: 24,
        };
        let mut source = open_source(&config)?;
        source.connect()?;
        let frame = source.capture()?;
        assert_eq!((frame.width, frame.height), (32, 24));
        Ok(())
    }

    #[test]
    fn open_source_rejects_network_urls() {
        let config = SourceConfig {
            url: "rtsp://camera".to_string(),
            ..SourceConfig::default()
        };
        assert!(open_source(&config).is_err());
    }
}
