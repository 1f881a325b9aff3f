//! Captured frames.
//!
//! A `Frame` is owned by the loop iteration that captured it and dropped at
//! the end of that iteration. There is no `Clone`: collaborators borrow it.

use std::time::{Duration, Instant};

use crate::error::CaptureError;

/// Bytes per RGB24 pixel.
pub const RGB_CHANNELS: usize = 3;

/// Opaque RGB24 image buffer.
pub struct Frame {
    /// Packed RGB24, row-major, no padding.
    pixels: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Per-source capture counter, starting at 1.
    pub sequence: u64,

    /// Monotonic capture instant (for latency reporting only).
    captured_at: Instant,
}

impl Frame {
    /// Wrap an RGB24 buffer. Fails if the buffer length does not match the
    /// dimensions.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u64,
    ) -> Result<Self, CaptureError> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(CaptureError::Format(format!(
                "expected {} RGB bytes for {}x{}, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Read-only pixel access for detectors and annotators.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// RGB value at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is never logged.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Expected RGB24 buffer length for the given dimensions.
pub fn rgb_len(width: u32, height: u32) -> Result<usize, CaptureError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| {
            CaptureError::Format(format!("frame dimensions {}x{} overflow", width, height))
        })
}
