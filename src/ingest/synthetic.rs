//! Synthetic frame source for `stub://` URLs.
//!
//! Produces a static gradient "scene" that changes every `scene` frames, so
//! content-hashing detectors see a stable label set per scene. Optional URL
//! query parameters:
//! - `scene=N`: frames per scene (default 90)
//! - `drop=P`: probability in 0..1 that a capture fails (default 0)

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use rand::Rng;

use super::{FrameSource, SourceConfig, SourceStats};
use crate::error::CaptureError;
use crate::frame::{rgb_len, Frame};

const DEFAULT_SCENE_FRAMES: u64 = 90;

pub struct SyntheticSource {
    config: SourceConfig,
    scene_frames: u64,
    drop_rate: f64,
    connected: bool,
    attempts: u64,
    frame_count: u64,
    failures: u64,
    scene_state: u8,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let (scene_frames, drop_rate) = parse_options(&config.url)?;
        rgb_len(config.width, config.height)?;
        Ok(Self {
            config,
            scene_frames,
            drop_rate,
            connected: false,
            attempts: 0,
            frame_count: 0,
            failures: 0,
            scene_state: 0,
            next_due: None,
        })
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.target_fps;
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + interval);
    }

    /// Gradient whose phase depends only on the current scene.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        if self.attempts > 1 && (self.attempts - 1) % self.scene_frames == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let width = self.config.width as usize;
        let mut pixels = vec![0u8; width * self.config.height as usize * 3];
        let phase = self.scene_state as usize * 37;
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let (x, y) = (i % width, i / width);
            px[0] = ((x + phase) % 256) as u8;
            px[1] = ((y + phase) % 256) as u8;
            px[2] = ((x + y + phase) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.url,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        if !self.connected {
            return Err(CaptureError::Disconnected(self.config.url.clone()));
        }
        self.pace();
        self.attempts += 1;
        let pixels = self.generate_synthetic_pixels();

        if self.drop_rate > 0.0 && rand::thread_rng().gen_bool(self.drop_rate) {
            self.failures += 1;
            return Err(CaptureError::NoFrame(format!(
                "{}: simulated drop",
                self.config.url
            )));
        }

        self.frame_count += 1;
        Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            capture_failures: self.failures,
            source: self.config.url.clone(),
        }
    }
}

fn parse_options(url: &str) -> Result<(u64, f64)> {
    let mut scene_frames = DEFAULT_SCENE_FRAMES;
    let mut drop_rate = 0.0;
    let Some((_, query)) = url.split_once('?') else {
        return Ok((scene_frames, drop_rate));
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("malformed stub option '{}'", pair))?;
        match key {
            "scene" => {
                scene_frames = value
                    .parse()
                    .map_err(|_| anyhow!("stub option scene must be an integer"))?;
                if scene_frames == 0 {
                    return Err(anyhow!("stub option scene must be >= 1"));
                }
            }
            "drop" => {
                drop_rate = value
                    .parse()
                    .map_err(|_| anyhow!("stub option drop must be a number"))?;
                if !(0.0..=1.0).contains(&drop_rate) {
                    return Err(anyhow!("stub option drop must be within 0..=1"));
                }
            }
            other => return Err(anyhow!("unknown stub option '{}'", other)),
        }
    }
    Ok((scene_frames, drop_rate))
}
