#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::camera::Frame;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{suppress_overlaps, BoundingBox, DetectionResult};

/// Tract-based backend for YOLO-style ONNX detection models.
///
/// Expects a single `[1, 3, S, S]` float input and a `[1, 4 + classes, anchors]`
/// output (the ultralytics export layout). The transposed `[1, anchors, 4 + classes]`
/// layout is accepted as well.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    class_names: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, class_names: Vec<String>) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence and overlap thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = image::imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            pixels[(y * side + x) * 3 + channel] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn label_for(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<DetectionResult>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;
        let (_, d1, d2) = view.dim();
        // Anchors always outnumber attributes.
        let transposed = d1 > d2;
        let (attrs, anchors) = if transposed { (d2, d1) } else { (d1, d2) };
        if attrs < 5 {
            return Err(anyhow!("model output has {} attributes, expected >= 5", attrs));
        }
        let at = |attr: usize, anchor: usize| {
            if transposed {
                view[[0, anchor, attr]]
            } else {
                view[[0, attr, anchor]]
            }
        };

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..attrs)
                .map(|attr| (attr - 4, at(attr, anchor)))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            candidates.push(DetectionResult {
                label: self.label_for(class_id),
                confidence: score,
                bounding_box: BoundingBox {
                    x: (cx - w / 2.0) * sx,
                    y: (cy - h / 2.0) * sy,
                    w: w * sx,
                    h: h * sy,
                },
            });
        }
        Ok(suppress_overlaps(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectionResult>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}
