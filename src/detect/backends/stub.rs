use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const STUB_VOCABULARY: [&str; 6] = ["person", "cat", "dog", "cup", "chair", "bottle"];

/// Stub backend for demos and testing without a model.
///
/// Detections are derived from a hash of the frame content, so identical
/// frames always yield identical detections and a static scene produces a
/// stable label set.
#[derive(Default)]
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.frames_seen += 1;
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();

        // One scene in four is empty.
        let count = (digest[0] % 4) as usize;
        let detections = (0..count)
            .map(|i| {
                let b = &digest[1 + i * 5..6 + i * 5];
                let label = STUB_VOCABULARY[b[0] as usize % STUB_VOCABULARY.len()];
                let x0 = b[1] as f32 / 512.0;
                let y0 = b[2] as f32 / 512.0;
                let bbox = BoundingBox::new(x0, y0, x0 + 0.25, y0 + 0.25);
                let confidence = 0.5 + (b[3] as f32 / 512.0);
                Detection::new(label, confidence, bbox)
            })
            .collect();
        Ok(detections)
    }
}
