//! seesay: say what the camera sees.
//!
//! This crate turns a live video stream into short spoken notifications
//! ("I see a cat") while rendering an annotated preview.
//!
//! # Architecture
//!
//! The camera driver, the detection model, the speech engine and the
//! preview window are external collaborators consumed through narrow
//! traits. The crate itself owns the coordination:
//!
//! - `policy`: the debounce/novelty rules deciding when a label is worth
//!   announcing (one label per frame, repeat only after a cooldown)
//! - `pipeline`: the single-threaded capture -> detect -> decide -> speak ->
//!   render loop, with per-stage failure isolation and cooperative
//!   termination
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (synthetic `stub://`, V4L2 devices)
//! - `detect`: Detections, label sets and detector backends
//! - `announce`: Speech engines and the background speech worker
//! - `render`: Box annotation and preview sinks
//! - `signal`: Termination flag, Ctrl-C and quit-key bindings
//! - `config`: File + environment configuration

pub mod announce;
pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod policy;
pub mod render;
pub mod signal;

pub use announce::{
    Announcer, AnnouncerWorker, ConsoleAnnouncer, EspeakAnnouncer, RecordingAnnouncer,
};
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use detect::{
    label_set, BackendRegistry, BoundingBox, DetectedLabelSet, Detection, DetectorBackend,
    ScriptedBackend, StubBackend,
};
pub use error::{CaptureError, SpeechError};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceConfig, SourceStats, SyntheticSource};
pub use pipeline::{CycleOutcome, LoopOptions, LoopState, LoopStats, PerceptionLoop};
pub use policy::{AnnouncementState, NotificationPolicy, DEFAULT_COOLDOWN};
pub use render::{AnnotatedImage, Annotator, BoxAnnotator, LogPreview, PreviewSink};
pub use signal::{ShutdownFlag, TerminationSignal};
