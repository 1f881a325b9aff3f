use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{AnnotatedImage, PreviewSink};

/// Writes the latest annotated frame to a JPEG file.
///
/// The file is replaced atomically (write to a sibling temp file, then
/// rename) so an image viewer watching the path never reads a partial file.
pub struct JpegPreview {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl JpegPreview {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("jpg.tmp");
        Self { path, tmp_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreviewSink for JpegPreview {
    fn show(&mut self, image: &AnnotatedImage) -> Result<()> {
        let buffer = image::RgbImage::from_raw(image.width, image.height, image.pixels.clone())
            .ok_or_else(|| anyhow!("annotated image buffer does not match its dimensions"))?;
        buffer
            .save_with_format(&self.tmp_path, image::ImageFormat::Jpeg)
            .with_context(|| format!("write preview {}", self.tmp_path.display()))?;
        std::fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("replace preview {}", self.path.display()))?;
        Ok(())
    }
}
