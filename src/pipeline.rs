//! The perception loop.
//!
//! One thread, one cycle at a time:
//! 1. Capture a frame (a failure skips the rest of the cycle)
//! 2. Run the detector (a failure skips announcement and render for this frame)
//! 3. Collapse detections to a label set and ask the policy for an announcement
//! 4. Hand the announcement to the announcer
//! 5. Render the annotated preview (best-effort)
//! 6. Poll the termination signal
//!
//! Stage order within a cycle is strict, and cycle N+1 never starts before
//! cycle N's `speak` call returns. Wrap the announcer in an
//! `AnnouncerWorker` to keep speech from stalling capture.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::announce::Announcer;
use crate::clock::{Clock, MonotonicClock};
use crate::detect::{label_set, DetectorBackend};
use crate::ingest::FrameSource;
use crate::policy::NotificationPolicy;
use crate::render::{Annotator, BoxAnnotator, LogPreview, PreviewSink};
use crate::signal::TerminationSignal;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const CAPTURE_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Loop lifecycle. The only transition is Running -> Terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Terminated,
}

/// What happened in one cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No frame this cycle; nothing else ran.
    CaptureFailed,
    /// The detector failed on this frame; no announcement, no render.
    DetectorFailed,
    /// The frame went through every stage.
    Processed {
        detections: usize,
        announced: Option<String>,
    },
}

/// Tunables for failure handling and bounded runs.
#[derive(Clone, Debug, Default)]
pub struct LoopOptions {
    /// Upper bound for exponential backoff after consecutive capture
    /// failures. Zero retries immediately every cycle.
    pub capture_backoff_max: Duration,
    /// Stop with an error after this many consecutive detector failures.
    /// Zero never escalates.
    pub max_consecutive_detector_failures: u32,
    /// Stop after this many cycles (any outcome). `None` runs until signalled.
    pub max_cycles: Option<u64>,
}

/// Running totals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub frames_processed: u64,
    pub capture_failures: u64,
    pub detector_failures: u64,
    pub announcements: u64,
    pub speech_failures: u64,
    pub render_failures: u64,
}

pub struct PerceptionLoop {
    source: Option<Box<dyn FrameSource>>,
    detector: Box<dyn DetectorBackend>,
    announcer: Box<dyn Announcer>,
    annotator: Box<dyn Annotator>,
    preview: Box<dyn PreviewSink>,
    clock: Box<dyn Clock>,
    policy: NotificationPolicy,
    options: LoopOptions,
    state: LoopState,
    stats: LoopStats,
    consecutive_capture_failures: u32,
    consecutive_detector_failures: u32,
}

impl PerceptionLoop {
    /// Build a loop with a box annotator, a log-only preview, a monotonic
    /// clock and the default policy. The source must already be connected.
    pub fn new<S, D, A>(source: S, detector: D, announcer: A) -> Self
    where
        S: FrameSource + 'static,
        D: DetectorBackend + 'static,
        A: Announcer + 'static,
    {
        Self {
            source: Some(Box::new(source)),
            detector: Box::new(detector),
            announcer: Box::new(announcer),
            annotator: Box::new(BoxAnnotator::default()),
            preview: Box::new(LogPreview::new()),
            clock: Box::new(MonotonicClock::new()),
            policy: NotificationPolicy::default(),
            options: LoopOptions::default(),
            state: LoopState::Running,
            stats: LoopStats::default(),
            consecutive_capture_failures: 0,
            consecutive_detector_failures: 0,
        }
    }

    pub fn with_annotator<R: Annotator + 'static>(mut self, annotator: R) -> Self {
        self.annotator = Box::new(annotator);
        self
    }

    pub fn with_preview<P: PreviewSink + 'static>(mut self, preview: P) -> Self {
        self.preview = Box::new(preview);
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_policy(mut self, policy: NotificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    /// Run one cycle. Fails only after termination or when detector
    /// failures escalate.
    pub fn step(&mut self) -> Result<CycleOutcome> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| anyhow!("perception loop already terminated"))?;
        self.stats.cycles += 1;

        let frame = match source.capture() {
            Ok(frame) => {
                self.consecutive_capture_failures = 0;
                frame
            }
            Err(err) => {
                self.stats.capture_failures += 1;
                self.consecutive_capture_failures =
                    self.consecutive_capture_failures.saturating_add(1);
                log::warn!("could not read frame: {}", err);
                let delay = capture_backoff(
                    self.consecutive_capture_failures,
                    self.options.capture_backoff_max,
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                return Ok(CycleOutcome::CaptureFailed);
            }
        };

        let detections = match self.detector.detect(&frame) {
            Ok(detections) => {
                self.consecutive_detector_failures = 0;
                detections
            }
            Err(err) => {
                self.stats.detector_failures += 1;
                self.consecutive_detector_failures =
                    self.consecutive_detector_failures.saturating_add(1);
                log::warn!(
                    "{} detector failed on frame #{}: {:#}",
                    self.detector.name(),
                    frame.sequence,
                    err
                );
                let limit = self.options.max_consecutive_detector_failures;
                if limit > 0 && self.consecutive_detector_failures >= limit {
                    self.terminate();
                    return Err(anyhow!(
                        "detector failed on {} consecutive frames: {:#}",
                        self.consecutive_detector_failures,
                        err
                    ));
                }
                return Ok(CycleOutcome::DetectorFailed);
            }
        };
        self.stats.frames_processed += 1;

        let labels = label_set(&detections);
        let announced = self
            .policy
            .decide(&labels, self.clock.now())
            .filter(|text| !text.is_empty());

        if let Some(text) = &announced {
            log::info!("{}", text);
            self.stats.announcements += 1;
            // State already advanced: a failed utterance is not retried.
            if let Err(err) = self.announcer.speak(text) {
                self.stats.speech_failures += 1;
                log::warn!("{} could not speak: {}", self.announcer.name(), err);
            }
        }

        match self.annotator.render(&frame, &detections) {
            Ok(image) => {
                if let Err(err) = self.preview.show(&image) {
                    self.stats.render_failures += 1;
                    log::warn!("preview failed: {:#}", err);
                }
            }
            Err(err) => {
                self.stats.render_failures += 1;
                log::warn!("render failed: {:#}", err);
            }
        }

        Ok(CycleOutcome::Processed {
            detections: detections.len(),
            announced,
        })
    }

    /// Run cycles until `signal` is set (polled once at the end of every
    /// cycle) or the configured cycle limit is reached, then release the
    /// frame source.
    pub fn run(&mut self, signal: &dyn TerminationSignal) -> Result<LoopStats> {
        let mut last_health_log = Instant::now();

        while self.state == LoopState::Running {
            self.step()?;

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                self.log_health();
                last_health_log = Instant::now();
            }

            let limit_reached = self
                .options
                .max_cycles
                .is_some_and(|max| self.stats.cycles >= max);
            if signal.should_terminate() || limit_reached {
                self.terminate();
            }
        }

        log::info!(
            "perception loop stopped after {} cycles ({} announcements)",
            self.stats.cycles,
            self.stats.announcements
        );
        Ok(self.stats.clone())
    }

    /// Enter the terminal state and release the frame source. Idempotent.
    pub fn terminate(&mut self) {
        self.state = LoopState::Terminated;
        if let Some(source) = self.source.take() {
            log::info!("releasing frame source {}", source.stats().source);
        }
    }

    fn log_health(&self) {
        if let Some(source) = &self.source {
            let stats = source.stats();
            log::info!(
                "source health={} frames={} failures={} url={} announcements={}",
                source.is_healthy(),
                stats.frames_captured,
                stats.capture_failures,
                stats.source,
                self.stats.announcements
            );
        }
    }
}

/// Delay before the next capture after `consecutive` failures: doubling
/// from 10 ms, capped at `max`. Zero `max` disables backoff.
pub fn capture_backoff(consecutive: u32, max: Duration) -> Duration {
    if max.is_zero() || consecutive == 0 {
        return Duration::ZERO;
    }
    let shift = (consecutive - 1).min(16);
    CAPTURE_BACKOFF_BASE
        .saturating_mul(1u32 << shift)
        .min(max)
}
