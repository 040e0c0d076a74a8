#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult, ObjectClass};

/// Tract-based backend for ONNX object detection.
///
/// The model takes a `1x3xHxW` f32 tensor in 0..1 and returns detection rows
/// of `[x1, y1, x2, y2, score, class]` (any leading batch axes are
/// flattened). Coordinates may be normalized or in model-input pixels.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized = image::imageops::resize(image, self.width, self.height, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn extract_detections(&self, outputs: TVec<TValue>) -> Result<DetectionResult> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = rows.shape();
        let row_len = *shape.last().ok_or_else(|| anyhow!("model output is a scalar"))?;
        if row_len < 6 {
            return Err(anyhow!(
                "expected detection rows of at least 6 values, got {}",
                row_len
            ));
        }
        let flat: Vec<f32> = rows.iter().copied().collect();

        let mut result = DetectionResult::default();
        for row in flat.chunks_exact(row_len) {
            let score = row[4];
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let scale = |v: f32, size: u32| if v > 1.0 { v / size as f32 } else { v };
            let x1 = scale(row[0], self.width);
            let y1 = scale(row[1], self.height);
            let x2 = scale(row[2], self.width);
            let y2 = scale(row[3], self.height);
            result.detections.push(
                Detection {
                    x: x1,
                    y: y1,
                    w: (x2 - x1).max(0.0),
                    h: (y2 - y1).max(0.0),
                    confidence: score,
                    class: ObjectClass::from_index(row[5].round() as i64),
                }
                .clamped(),
            );
        }
        result.sort_by_confidence();
        Ok(result)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<DetectionResult> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.width, self.height);
        self.detect(&blank).map(|_| ())
    }
}
