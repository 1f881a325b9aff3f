//! Annotated preview output.
//!
//! Rendering is best-effort: the loop logs and ignores any failure here.

use anyhow::Result;

use crate::detect::Detection;
use crate::frame::Frame;

mod annotate;
#[cfg(feature = "preview-jpeg")]
mod jpeg;

pub use annotate::BoxAnnotator;
#[cfg(feature = "preview-jpeg")]
pub use jpeg::JpegPreview;

/// Displayable RGB24 image produced by an annotator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotatedImage {
    pub width: u32,
    pub height: u32,
    /// Packed RGB24.
    pub pixels: Vec<u8>,
    /// Number of detections drawn.
    pub boxes: usize,
    /// Frame this image was rendered from.
    pub sequence: u64,
}

/// Draws detections onto a frame.
pub trait Annotator {
    fn render(&mut self, frame: &Frame, detections: &[Detection]) -> Result<AnnotatedImage>;
}

/// Destination for rendered previews (a window, a file, a log line).
pub trait PreviewSink {
    fn show(&mut self, image: &AnnotatedImage) -> Result<()>;
}

impl<A: Annotator + ?Sized> Annotator for Box<A> {
    fn render(&mut self, frame: &Frame, detections: &[Detection]) -> Result<AnnotatedImage> {
        (**self).render(frame, detections)
    }
}

impl<P: PreviewSink + ?Sized> PreviewSink for Box<P> {
    fn show(&mut self, image: &AnnotatedImage) -> Result<()> {
        (**self).show(image)
    }
}

/// Headless preview: logs a one-line summary per frame at debug level.
#[derive(Default)]
pub struct LogPreview {
    shown: u64,
}

impl LogPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl PreviewSink for LogPreview {
    fn show(&mut self, image: &AnnotatedImage) -> Result<()> {
        self.shown += 1;
        log::debug!(
            "preview frame #{} {}x{} boxes={}",
            image.sequence,
            image.width,
            image.height,
            image.boxes
        );
        Ok(())
    }
}
