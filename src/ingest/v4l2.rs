//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing from local V4L2 devices
//! (USB webcams such as `/dev/video0`).
//!
//! The V4L2 source is responsible for:
//! - Opening the device node and negotiating resolution and frame rate
//! - Capturing frames through a memory-mapped buffer stream
//! - Normalizing RGB3/YUYV/NV12/MJPG buffers to RGB24
//!
//! A failed dequeue is reported as a `CaptureError` and the stream stays
//! open, so the next cycle simply tries again.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceConfig, SourceStats};
use crate::error::CaptureError;
use crate::frame::Frame;

const ENODEV: i32 = 19;

/// V4L2 frame source using libv4l memory-mapped streaming.
pub struct V4l2Source {
    config: SourceConfig,
    state: Option<DeviceV4l2State>,
    pixel_format: PixelFormat,
    frame_count: u64,
    failures: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: SourceConfig) -> Result<Self> {
        Ok(Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            pixel_format: PixelFormat::Rgb24,
            frame_count: 0,
            failures: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn record_failure(&mut self, err: CaptureError) -> CaptureError {
        self.failures += 1;
        self.last_error = Some(err.to_string());
        err
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.url)
            .with_context(|| format!("open v4l2 device {}", self.config.url))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.url,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                self.config.url,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.url,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.url,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            let err = CaptureError::Disconnected(format!("{} not connected", self.config.url));
            return Err(self.record_failure(err));
        };

        let (width, height, format) = (self.active_width, self.active_height, self.pixel_format);
        let converted = state.with_mut(|fields| match fields.stream.next() {
            Ok((buf, _meta)) => normalize_to_rgb(buf, width, height, format)
                .map_err(|err| CaptureError::Format(err.to_string())),
            Err(err) if err.raw_os_error() == Some(ENODEV) => {
                Err(CaptureError::Disconnected(err.to_string()))
            }
            Err(err) => Err(CaptureError::NoFrame(err.to_string())),
        });

        let pixels = match converted {
            Ok(pixels) => pixels,
            Err(err) => return Err(self.record_failure(err)),
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Frame::new(pixels, width, height, self.frame_count)
    }

    fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            capture_failures: self.failures,
            source: self.config.url.clone(),
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.config.url);
        }
    }
}
