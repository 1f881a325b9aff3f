//! Speech output.
//!
//! The `Announcer` trait is the narrow interface to a speech engine. A
//! `speak` call blocks until the utterance has finished; wrap an announcer in
//! an [`AnnouncerWorker`] to move that wait off the perception loop.

use std::sync::{Arc, Mutex};

use crate::error::SpeechError;

mod espeak;
mod worker;

pub use espeak::{EspeakAnnouncer, DEFAULT_RATE_WPM};
pub use worker::{AnnouncerWorker, WorkerStats};

/// Speech synthesis provider.
pub trait Announcer: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Say `text`. Returns once the utterance is complete (or queued, for
    /// asynchronous wrappers).
    fn speak(&mut self, text: &str) -> Result<(), SpeechError>;
}

impl<A: Announcer + ?Sized> Announcer for Box<A> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        (**self).speak(text)
    }
}

/// Prints announcements to stdout instead of speaking them.
#[derive(Default)]
pub struct ConsoleAnnouncer;

impl Announcer for ConsoleAnnouncer {
    fn name(&self) -> &'static str {
        "console"
    }

    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        println!("{}", text);
        Ok(())
    }
}

/// Records every utterance; can be told to fail. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingAnnouncer {
    spoken: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// An announcer whose engine is "unavailable": every call fails but is
    /// still recorded as attempted.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        match self.spoken.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Announcer for RecordingAnnouncer {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        self.spoken
            .lock()
            .map_err(|_| SpeechError::Failed("recording lock poisoned".to_string()))?
            .push(text.to_string());
        if self.fail {
            return Err(SpeechError::Unavailable("recording announcer set to fail".to_string()));
        }
        Ok(())
    }
}
