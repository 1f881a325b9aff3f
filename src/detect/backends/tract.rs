#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::COCO_LABELS;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::{Frame, RGB_CHANNELS};

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLOv5-style ONNX object detectors.
///
/// Expects a single `[1, 3, H, W]` f32 input and a `[1, N, 5 + classes]`
/// output of `(cx, cy, w, h, objectness, class scores...)` in input pixel
/// units. Frames of any size are resampled (nearest neighbour) to the model
/// input. The model file is loaded from local disk once.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
    labels: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            labels: COCO_LABELS.iter().map(|l| l.to_string()).collect(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Replace the class vocabulary (index = class id).
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("frame has zero size"));
        }
        let pixels = frame.pixels();
        let (fw, fh) = (frame.width as usize, frame.height as usize);
        let (mw, mh) = (self.input_width as usize, self.input_height as usize);

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, mh, mw), |(_, channel, y, x)| {
            let sx = (x * fw / mw).min(fw - 1);
            let sy = (y * fh / mh).min(fh - 1);
            let idx = (sy * fw + sx) * RGB_CHANNELS + channel;
            pixels[idx] as f32 / 255.0
        });

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[2] < 6 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let rows = view
            .into_shape((shape[1], shape[2]))
            .context("reshape model output")?;

        let (mw, mh) = (self.input_width as f32, self.input_height as f32);
        let mut candidates = Vec::new();
        for row in rows.outer_iter() {
            let objectness = row[4];
            if objectness < self.confidence_threshold {
                continue;
            }
            let Some((class_id, class_score)) = row
                .iter()
                .skip(5)
                .enumerate()
                .fold(None, |best: Option<(usize, f32)>, (i, &s)| match best {
                    Some((_, b)) if b >= s => best,
                    _ => Some((i, s)),
                })
            else {
                continue;
            };
            let confidence = objectness * class_score;
            if confidence < self.confidence_threshold {
                continue;
            }
            let label = self
                .labels
                .get(class_id)
                .cloned()
                .unwrap_or_else(|| format!("class {}", class_id));
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let bbox = BoundingBox::new(
                (cx - w / 2.0) / mw,
                (cy - h / 2.0) / mh,
                (cx + w / 2.0) / mw,
                (cy + h / 2.0) / mh,
            );
            candidates.push(Detection::new(label, confidence, bbox));
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Class-aware greedy NMS. Output is ordered by descending confidence.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.label == cand.label && k.bbox.iou(&cand.bbox) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(
            vec![0u8; self.input_width as usize * self.input_height as usize * RGB_CHANNELS],
            self.input_width,
            self.input_height,
            0,
        )?;
        self.detect(&blank).map(|_| ())
    }
}
