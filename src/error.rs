//! Typed errors for the collaborators the perception loop branches on.
//!
//! Detector failures stay opaque (`anyhow::Error`): the loop only needs to
//! know that the frame could not be analyzed.

use thiserror::Error;

/// A frame was not available this cycle.
///
/// Every variant is transient from the loop's point of view: the cycle is
/// skipped and capture is retried on the next one.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no frame available: {0}")]
    NoFrame(String),
    #[error("frame source disconnected: {0}")]
    Disconnected(String),
    #[error("unusable frame format: {0}")]
    Format(String),
}

/// Speech synthesis could not be performed.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech engine unavailable: {0}")]
    Unavailable(String),
    #[error("speech synthesis failed: {0}")]
    Failed(String),
    #[error("speech worker has shut down")]
    QueueClosed,
}
