use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::announce::Announcer;
use crate::error::SpeechError;

/// Counters shared between the worker thread and its handle.
#[derive(Debug, Default)]
struct Counters {
    spoken: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of worker activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub spoken: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Runs a blocking announcer on its own thread.
///
/// The queue holds a single pending utterance. While one utterance is being
/// spoken and another is already pending, further requests are dropped.
/// `speak` never blocks the caller.
pub struct AnnouncerWorker {
    name: &'static str,
    tx: Option<SyncSender<String>>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl AnnouncerWorker {
    pub fn spawn<A: Announcer + 'static>(mut inner: A) -> std::io::Result<Self> {
        let name = inner.name();
        let (tx, rx) = mpsc::sync_channel::<String>(1);
        let counters = Arc::new(Counters::default());
        let thread_counters = Arc::clone(&counters);

        let handle = std::thread::Builder::new()
            .name("announcer".to_string())
            .spawn(move || {
                for text in rx {
                    match inner.speak(&text) {
                        Ok(()) => {
                            thread_counters.spoken.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            thread_counters.failed.fetch_add(1, Ordering::Relaxed);
                            log::warn!("speech failed for {:?}: {}", text, err);
                        }
                    }
                }
                log::debug!("announcer worker exiting");
            })?;

        Ok(Self {
            name,
            tx: Some(tx),
            handle: Some(handle),
            counters,
        })
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            spoken: self.counters.spoken.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, finish the in-flight and pending utterances, and
    /// join the thread.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("announcer worker panicked");
            }
        }
    }
}

impl Announcer for AnnouncerWorker {
    fn name(&self) -> &'static str {
        self.name
    }

    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        let tx = self.tx.as_ref().ok_or(SpeechError::QueueClosed)?;
        match tx.try_send(text.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(text)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("speech busy, dropped {:?}", text);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SpeechError::QueueClosed),
        }
    }
}

impl Drop for AnnouncerWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::RecordingAnnouncer;
    use std::sync::mpsc::{Receiver, Sender};
    use std::sync::Mutex;

    /// Blocks inside `speak` until the test releases it.
    struct GatedAnnouncer {
        started: Sender<String>,
        release: Arc<Mutex<Receiver<()>>>,
        record: RecordingAnnouncer,
    }

    impl Announcer for GatedAnnouncer {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
            let _ = self.started.send(text.to_string());
            let _ = self.release.lock().unwrap().recv();
            self.record.speak(text)
        }
    }

    #[test]
    fn worker_speaks_queued_text() {
        let record = RecordingAnnouncer::new();
        let mut worker = AnnouncerWorker::spawn(record.clone()).unwrap();
        worker.speak("I see a cat").unwrap();
        worker.shutdown();

        assert_eq!(record.spoken(), vec!["I see a cat"]);
        assert_eq!(worker.stats().spoken, 1);
        assert_eq!(worker.name(), "recording");
    }

    #[test]
    fn requests_beyond_single_pending_slot_are_dropped() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let record = RecordingAnnouncer::new();
        let gated = GatedAnnouncer {
            started: started_tx,
            release: Arc::new(Mutex::new(release_rx)),
            record: record.clone(),
        };
        let mut worker = AnnouncerWorker::spawn(gated).unwrap();

        worker.speak("I see a cat").unwrap();
        assert_eq!(started_rx.recv().unwrap(), "I see a cat");

        // "dog" fills the pending slot, "cup" finds it full.
        worker.speak("I see a dog").unwrap();
        worker.speak("I see a cup").unwrap();
        assert_eq!(worker.stats().dropped, 1);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        worker.shutdown();

        assert_eq!(record.spoken(), vec!["I see a cat", "I see a dog"]);
        assert_eq!(worker.stats().spoken, 2);
    }

    #[test]
    fn speech_failures_are_counted_not_propagated() {
        let mut worker = AnnouncerWorker::spawn(RecordingAnnouncer::failing()).unwrap();
        assert!(worker.speak("I see a cat").is_ok());
        worker.shutdown();
        assert_eq!(worker.stats().failed, 1);
    }

    #[test]
    fn speak_after_shutdown_reports_closed_queue() {
        let mut worker = AnnouncerWorker::spawn(RecordingAnnouncer::new()).unwrap();
        worker.shutdown();
        assert!(matches!(
            worker.speak("I see a cat"),
            Err(SpeechError::QueueClosed)
        ));
    }
}
