use anyhow::Result;

use super::{AnnotatedImage, Annotator};
use crate::detect::Detection;
use crate::frame::{Frame, RGB_CHANNELS};

const PALETTE: [[u8; 3]; 6] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [72, 249, 10],
    [0, 194, 255],
    [132, 56, 255],
];

/// Draws a colored outline around each detection. Colors are stable per
/// label.
pub struct BoxAnnotator {
    thickness: u32,
}

impl BoxAnnotator {
    pub fn new(thickness: u32) -> Self {
        Self {
            thickness: thickness.max(1),
        }
    }
}

impl Default for BoxAnnotator {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Annotator for BoxAnnotator {
    fn render(&mut self, frame: &Frame, detections: &[Detection]) -> Result<AnnotatedImage> {
        let mut pixels = frame.pixels().to_vec();
        let (w, h) = (frame.width, frame.height);
        if w > 0 && h > 0 {
            for det in detections {
                let color = label_color(&det.label);
                let x0 = scale(det.bbox.x0, w);
                let y0 = scale(det.bbox.y0, h);
                let x1 = scale(det.bbox.x1, w);
                let y1 = scale(det.bbox.y1, h);
                draw_rect(&mut pixels, w, (x0, y0, x1, y1), self.thickness, color);
            }
        }
        Ok(AnnotatedImage {
            width: w,
            height: h,
            pixels,
            boxes: detections.len(),
            sequence: frame.sequence,
        })
    }
}

fn scale(v: f32, extent: u32) -> u32 {
    ((v * extent as f32) as u32).min(extent - 1)
}

fn label_color(label: &str) -> [u8; 3] {
    let idx = label.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    PALETTE[idx % PALETTE.len()]
}

fn draw_rect(
    pixels: &mut [u8],
    width: u32,
    rect: (u32, u32, u32, u32),
    thickness: u32,
    color: [u8; 3],
) {
    let (x0, y0, x1, y1) = rect;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_edge = x - x0 < thickness
                || x1 - x < thickness
                || y - y0 < thickness
                || y1 - y < thickness;
            if on_edge {
                let idx = (y as usize * width as usize + x as usize) * RGB_CHANNELS;
                pixels[idx..idx + RGB_CHANNELS].copy_from_slice(&color);
            }
        }
    }
}
