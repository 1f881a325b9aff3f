//! Perception loop behaviour with scripted collaborators.
//!
//! Every collaborator is a deterministic fake: frames come from a scripted
//! source, detections from `ScriptedBackend`, time from `ManualClock`, and
//! speech goes to `RecordingAnnouncer`.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use seesay::{
    AnnotatedImage, Announcer, Annotator, BoundingBox, CaptureError, Clock, CycleOutcome, Detection,
    DetectorBackend, Frame, FrameSource, LoopOptions, LoopState, ManualClock, NotificationPolicy,
    PerceptionLoop, PreviewSink, RecordingAnnouncer, ScriptedBackend, ShutdownFlag, SourceStats,
    SpeechError, TerminationSignal, Timestamp,
};

/// Yields a tiny frame per capture, or fails where the script says so.
struct ScriptedSource {
    failures: VecDeque<bool>,
    sequence: u64,
}

impl ScriptedSource {
    fn always_ok() -> Self {
        Self::with_failures(&[])
    }

    /// `true` entries fail that capture; captures past the script succeed.
    fn with_failures(script: &[bool]) -> Self {
        Self {
            failures: script.iter().copied().collect(),
            sequence: 0,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        if self.failures.pop_front().unwrap_or(false) {
            return Err(CaptureError::NoFrame("scripted drop".to_string()));
        }
        self.sequence += 1;
        Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, self.sequence)
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.sequence,
            capture_failures: 0,
            source: "scripted".to_string(),
        }
    }
}

/// Counts frames shown.
#[derive(Clone, Default)]
struct CountingPreview {
    shown: Arc<AtomicU64>,
}

impl CountingPreview {
    fn shown(&self) -> u64 {
        self.shown.load(Ordering::SeqCst)
    }
}

impl PreviewSink for CountingPreview {
    fn show(&mut self, _image: &AnnotatedImage) -> Result<()> {
        self.shown.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BrokenAnnotator;

impl Annotator for BrokenAnnotator {
    fn render(&mut self, _frame: &Frame, _detections: &[Detection]) -> Result<AnnotatedImage> {
        Err(anyhow!("display unavailable"))
    }
}

/// Requests termination on the n-th poll.
struct StopAfterPolls {
    remaining: Cell<u32>,
}

impl TerminationSignal for StopAfterPolls {
    fn should_terminate(&self) -> bool {
        let left = self.remaining.get().saturating_sub(1);
        self.remaining.set(left);
        left == 0
    }
}

fn secs(s: u64) -> Timestamp {
    Timestamp::from_secs(s)
}

fn announced(outcome: CycleOutcome) -> Option<String> {
    match outcome {
        CycleOutcome::Processed { announced, .. } => announced,
        other => panic!("expected a processed frame, got {:?}", other),
    }
}

#[test]
fn scenario_cat_cooldown_through_the_loop() -> Result<()> {
    let clock = ManualClock::new();
    let speech = RecordingAnnouncer::new();
    let detector = ScriptedBackend::new()
        .then_labels(&["cat"])
        .then_labels(&["cat"])
        .then_labels(&["cat"])
        .then_labels(&[]);
    let mut pipeline = PerceptionLoop::new(ScriptedSource::always_ok(), detector, speech.clone())
        .with_clock(clock.clone());

    clock.set(secs(1));
    assert_eq!(announced(pipeline.step()?).as_deref(), Some("I see a cat"));
    clock.set(secs(3));
    assert_eq!(announced(pipeline.step()?), None);
    clock.set(secs(7));
    assert_eq!(announced(pipeline.step()?).as_deref(), Some("I see a cat"));
    clock.set(secs(8));
    assert_eq!(announced(pipeline.step()?), None);

    let state = pipeline.policy().state();
    assert_eq!(state.last_label.as_deref(), Some("cat"));
    assert_eq!(state.last_announced_at, secs(7));
    assert_eq!(speech.spoken(), vec!["I see a cat", "I see a cat"]);
    assert_eq!(pipeline.stats().announcements, 2);
    Ok(())
}

#[test]
fn capture_failure_skips_cycle_without_touching_state() -> Result<()> {
    let clock = ManualClock::new();
    let speech = RecordingAnnouncer::new();
    let detector = ScriptedBackend::new()
        .then_labels(&["cat"])
        .then_labels(&["dog"]);
    let source = ScriptedSource::with_failures(&[false, true, false]);
    let mut pipeline =
        PerceptionLoop::new(source, detector, speech.clone()).with_clock(clock.clone());

    clock.set(secs(1));
    pipeline.step()?;
    let before = pipeline.policy().state().clone();

    clock.set(secs(2));
    assert_eq!(pipeline.step()?, CycleOutcome::CaptureFailed);
    assert_eq!(pipeline.policy().state(), &before);

    // The next cycle runs normally and gets the detector's next scripted frame.
    clock.set(secs(3));
    assert_eq!(announced(pipeline.step()?).as_deref(), Some("I see a dog"));
    assert_eq!(speech.spoken(), vec!["I see a cat", "I see a dog"]);
    assert_eq!(pipeline.stats().capture_failures, 1);
    assert_eq!(pipeline.stats().frames_processed, 2);
    Ok(())
}

#[test]
fn detector_failure_skips_announcement_and_render() -> Result<()> {
    let clock = ManualClock::new();
    let speech = RecordingAnnouncer::new();
    let preview = CountingPreview::default();
    let detector = ScriptedBackend::new()
        .then_failure("out of memory")
        .then_labels(&["cup"]);
    let mut pipeline = PerceptionLoop::new(ScriptedSource::always_ok(), detector, speech.clone())
        .with_clock(clock.clone())
        .with_preview(preview.clone());

    clock.set(secs(1));
    assert_eq!(pipeline.step()?, CycleOutcome::DetectorFailed);
    assert_eq!(preview.shown(), 0);
    assert!(speech.spoken().is_empty());
    assert_eq!(pipeline.policy().state().last_label, None);

    clock.set(secs(2));
    assert_eq!(announced(pipeline.step()?).as_deref(), Some("I see a cup"));
    assert_eq!(preview.shown(), 1);
    assert_eq!(pipeline.stats().detector_failures, 1);
    Ok(())
}

#[test]
fn repeated_detector_failures_escalate_when_configured() {
    let detector = ScriptedBackend::new()
        .then_failure("bad model")
        .then_failure("bad model")
        .then_failure("bad model");
    let mut pipeline = PerceptionLoop::new(
        ScriptedSource::always_ok(),
        detector,
        RecordingAnnouncer::new(),
    )
    .with_options(LoopOptions {
        max_consecutive_detector_failures: 2,
        ..LoopOptions::default()
    });

    let err = pipeline.run(&ShutdownFlag::new()).unwrap_err();
    assert!(err.to_string().contains("2 consecutive frames"));
    assert_eq!(pipeline.state(), LoopState::Terminated);
    assert_eq!(pipeline.stats().detector_failures, 2);
}

#[test]
fn detector_failures_do_not_escalate_by_default() -> Result<()> {
    let mut detector = ScriptedBackend::new();
    for _ in 0..10 {
        detector = detector.then_failure("flaky");
    }
    let mut pipeline = PerceptionLoop::new(
        ScriptedSource::always_ok(),
        detector,
        RecordingAnnouncer::new(),
    )
    .with_options(LoopOptions {
        max_cycles: Some(10),
        ..LoopOptions::default()
    });

    let stats = pipeline.run(&ShutdownFlag::new())?;
    assert_eq!(stats.detector_failures, 10);
    assert_eq!(stats.cycles, 10);
    Ok(())
}

#[test]
fn speech_failure_still_advances_announcement_state() -> Result<()> {
    let clock = ManualClock::new();
    let speech = RecordingAnnouncer::failing();
    let detector = ScriptedBackend::new()
        .then_labels(&["dog"])
        .then_labels(&["dog"]);
    let mut pipeline = PerceptionLoop::new(ScriptedSource::always_ok(), detector, speech.clone())
        .with_clock(clock.clone());

    clock.set(secs(1));
    assert_eq!(announced(pipeline.step()?).as_deref(), Some("I see a dog"));
    assert_eq!(pipeline.policy().state().last_label.as_deref(), Some("dog"));

    // Within the cooldown: no retry storm after the failed utterance.
    clock.set(secs(2));
    assert_eq!(announced(pipeline.step()?), None);
    assert_eq!(speech.spoken().len(), 1);
    assert_eq!(pipeline.stats().speech_failures, 1);
    Ok(())
}

#[test]
fn only_one_label_is_announced_per_frame() -> Result<()> {
    let speech = RecordingAnnouncer::new();
    let detector = ScriptedBackend::new().then_labels(&["person", "dog", "bottle", "dog"]);
    let mut pipeline = PerceptionLoop::new(ScriptedSource::always_ok(), detector, speech.clone())
        .with_clock(ManualClock::new());

    match pipeline.step()? {
        CycleOutcome::Processed {
            detections,
            announced,
        } => {
            assert_eq!(detections, 4);
            assert_eq!(announced.as_deref(), Some("I see a bottle"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(speech.spoken(), vec!["I see a bottle"]);
    Ok(())
}

#[test]
fn render_failure_is_not_fatal() -> Result<()> {
    let detector = ScriptedBackend::new().then_labels(&["cat"]).then_labels(&["dog"]);
    let speech = RecordingAnnouncer::new();
    let mut pipeline = PerceptionLoop::new(ScriptedSource::always_ok(), detector, speech.clone())
        .with_clock(ManualClock::new())
        .with_annotator(BrokenAnnotator);

    pipeline.step()?;
    pipeline.step()?;
    assert_eq!(pipeline.stats().render_failures, 2);
    assert_eq!(speech.spoken(), vec!["I see a cat", "I see a dog"]);
    Ok(())
}

#[test]
fn termination_is_polled_once_per_cycle_and_final() -> Result<()> {
    let mut pipeline = PerceptionLoop::new(
        ScriptedSource::with_failures(&[true, false, true]),
        ScriptedBackend::new(),
        RecordingAnnouncer::new(),
    );
    let signal = StopAfterPolls {
        remaining: Cell::new(3),
    };

    let stats = pipeline.run(&signal)?;
    // Capture-failed cycles still reach the termination check.
    assert_eq!(stats.cycles, 3);
    assert_eq!(stats.capture_failures, 2);
    assert_eq!(pipeline.state(), LoopState::Terminated);

    // No re-entry.
    assert!(pipeline.step().is_err());
    Ok(())
}

#[test]
fn preset_shutdown_flag_stops_after_one_cycle() -> Result<()> {
    let flag = ShutdownFlag::new();
    flag.trigger();
    let mut pipeline = PerceptionLoop::new(
        ScriptedSource::always_ok(),
        ScriptedBackend::new(),
        RecordingAnnouncer::new(),
    );
    let stats = pipeline.run(&flag)?;
    assert_eq!(stats.cycles, 1);
    Ok(())
}

#[test]
fn capture_backoff_applies_between_failed_cycles() -> Result<()> {
    let mut pipeline = PerceptionLoop::new(
        ScriptedSource::with_failures(&[true, true, true]),
        ScriptedBackend::new(),
        RecordingAnnouncer::new(),
    )
    .with_options(LoopOptions {
        capture_backoff_max: Duration::from_millis(15),
        max_cycles: Some(4),
        ..LoopOptions::default()
    });

    let started = std::time::Instant::now();
    let stats = pipeline.run(&ShutdownFlag::new())?;
    // 10 ms + 15 ms + 15 ms of backoff before the fourth capture succeeds.
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(stats.capture_failures, 3);
    assert_eq!(stats.frames_processed, 1);
    Ok(())
}

#[test]
fn custom_cooldown_policy_is_used() -> Result<()> {
    let clock = ManualClock::new();
    let detector = ScriptedBackend::new().then_labels(&["cat"]).then_labels(&["cat"]);
    let speech = RecordingAnnouncer::new();
    let mut pipeline = PerceptionLoop::new(ScriptedSource::always_ok(), detector, speech.clone())
        .with_clock(clock.clone())
        .with_policy(NotificationPolicy::new(Duration::from_secs(1)));

    clock.set(secs(10));
    pipeline.step()?;
    clock.advance(Duration::from_millis(1_500));
    pipeline.step()?;
    assert_eq!(speech.spoken().len(), 2);
    Ok(())
}

type EventLog = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &EventLog, event: &'static str) {
    log.lock().unwrap().push(event);
}

/// Collaborators that append each stage they run to one shared log.
#[derive(Clone, Default)]
struct Staged {
    log: EventLog,
    sequence: u64,
}

impl FrameSource for Staged {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CaptureError> {
        record(&self.log, "capture");
        self.sequence += 1;
        Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, self.sequence)
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.sequence,
            capture_failures: 0,
            source: "staged".to_string(),
        }
    }
}

impl DetectorBackend for Staged {
    fn name(&self) -> &'static str {
        "staged"
    }

    // Alternates labels so every frame is novel and gets spoken.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        record(&self.log, "detect");
        let label = if frame.sequence % 2 == 1 { "cat" } else { "dog" };
        Ok(vec![Detection::new(label, 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0))])
    }
}

impl Clock for Staged {
    fn now(&self) -> Timestamp {
        record(&self.log, "decide");
        Timestamp::from_secs(self.sequence)
    }
}

impl Announcer for Staged {
    fn name(&self) -> &'static str {
        "staged"
    }

    fn speak(&mut self, _text: &str) -> Result<(), SpeechError> {
        record(&self.log, "speak");
        Ok(())
    }
}

impl PreviewSink for Staged {
    fn show(&mut self, _image: &AnnotatedImage) -> Result<()> {
        record(&self.log, "render");
        Ok(())
    }
}

#[test]
fn cycle_stages_run_in_order_and_speech_finishes_before_next_capture() -> Result<()> {
    let staged = Staged::default();
    let mut pipeline = PerceptionLoop::new(staged.clone(), staged.clone(), staged.clone())
        .with_clock(staged.clone())
        .with_preview(staged.clone());

    let stats = pipeline.run(&StopAfterPolls {
        remaining: Cell::new(2),
    })?;
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.announcements, 2);

    let events = staged.log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "capture", "detect", "decide", "speak", "render",
            "capture", "detect", "decide", "speak", "render",
        ]
    );
    let first_speak = events.iter().position(|e| *e == "speak").unwrap();
    let second_capture = events.iter().rposition(|e| *e == "capture").unwrap();
    assert!(first_speak < second_capture);
    Ok(())
}
