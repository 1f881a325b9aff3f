use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Replays a scripted sequence of per-frame outcomes.
///
/// Each call to `detect` consumes one scripted entry. Once the script runs
/// out every frame yields no detections.
#[derive(Default)]
pub struct ScriptedBackend {
    script: VecDeque<Result<Vec<Detection>, String>>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame that yields the given labels (full-frame boxes).
    pub fn then_labels(mut self, labels: &[&str]) -> Self {
        let detections = labels
            .iter()
            .map(|label| Detection::new(*label, 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0)))
            .collect();
        self.script.push_back(Ok(detections));
        self
    }

    /// Queue a frame that yields exactly these detections.
    pub fn then_detections(mut self, detections: Vec<Detection>) -> Self {
        self.script.push_back(Ok(detections));
        self
    }

    /// Queue a frame whose inference fails.
    pub fn then_failure(mut self, reason: &str) -> Self {
        self.script.push_back(Err(reason.to_string()));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(reason)) => Err(anyhow!("scripted inference failure: {}", reason)),
            None => Ok(Vec::new()),
        }
    }
}
