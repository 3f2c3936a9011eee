// src/action_classifier.rs

use crate::error::PipelineError;
use crate::types::Frame;
use anyhow::{bail, Result};
use image::{imageops::FilterType, Rgb, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::info;

/// One normalized sample for the sequence model: CHW float RGB at
/// `crop_size` x `crop_size`, values scaled to [0, 1].
#[derive(Debug, Clone)]
pub struct PreparedCrop {
    pub data: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ActionPrediction {
    pub label: String,
    pub confidence: f32,
}

/// Sequence-model contract: a full track window in, one labeled action out.
pub trait ActionClassifier {
    fn classify(&mut self, sequence: &[PreparedCrop]) -> Result<ActionPrediction>;
}

/// Crop a detection box out of a frame and normalize it for the classifier.
/// Returns `None` for boxes that clamp to (nearly) nothing.
pub fn prepare_crop(frame: &Frame, bbox: &[f32; 4], crop_size: usize) -> Option<PreparedCrop> {
    let x1 = bbox[0].max(0.0) as usize;
    let y1 = bbox[1].max(0.0) as usize;
    let x2 = (bbox[2].min(frame.width as f32) as usize).min(frame.width);
    let y2 = (bbox[3].min(frame.height as f32) as usize).min(frame.height);
    if x2 <= x1 + 1 || y2 <= y1 + 1 {
        return None;
    }
    let w = (x2 - x1) as u32;
    let h = (y2 - y1) as u32;

    let crop = RgbImage::from_fn(w, h, |x, y| {
        let idx = ((y1 + y as usize) * frame.width + (x1 + x as usize)) * 3;
        Rgb([frame.data[idx], frame.data[idx + 1], frame.data[idx + 2]])
    });
    let resized = image::imageops::resize(
        &crop,
        crop_size as u32,
        crop_size as u32,
        FilterType::Triangle,
    );

    // HWC u8 -> CHW f32 in [0, 1]
    let plane = crop_size * crop_size;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let pos = y as usize * crop_size + x as usize;
        for c in 0..3 {
            data[c * plane + pos] = pixel[c] as f32 / 255.0;
        }
    }
    Some(PreparedCrop { data })
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Index of the highest score; the first one on ties.
fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// ONNX sequence model over per-track crop windows.
///
/// Input is `[1, L, 3, crop, crop]` under the name "input"; output is one
/// logit per configured label.
pub struct OnnxActionClassifier {
    session: Session,
    labels: Vec<String>,
    crop_size: usize,
}

impl OnnxActionClassifier {
    pub fn new(
        model_path: &str,
        labels: Vec<String>,
        crop_size: usize,
    ) -> Result<Self, PipelineError> {
        if !Path::new(model_path).exists() {
            return Err(PipelineError::model_unavailable(format!(
                "action model not found: {}",
                model_path
            )));
        }

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(2))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                PipelineError::model_unavailable(format!("{}: {}", model_path, e))
            })?;

        info!(
            "✓ Action classifier ready ({}, {} labels)",
            model_path,
            labels.len()
        );
        Ok(Self {
            session,
            labels,
            crop_size,
        })
    }
}

impl ActionClassifier for OnnxActionClassifier {
    fn classify(&mut self, sequence: &[PreparedCrop]) -> Result<ActionPrediction> {
        if sequence.is_empty() {
            bail!("cannot classify an empty sequence");
        }
        let plane = 3 * self.crop_size * self.crop_size;
        let mut input = Vec::with_capacity(sequence.len() * plane);
        for crop in sequence {
            if crop.data.len() != plane {
                bail!(
                    "crop has {} values, classifier expects {}",
                    crop.data.len(),
                    plane
                );
            }
            input.extend_from_slice(&crop.data);
        }

        let shape = [1, sequence.len(), 3, self.crop_size, self.crop_size];
        let value = ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;
        let outputs = self.session.run(ort::inputs!["input" => value])?;
        let (_, logits) = outputs[0].try_extract_tensor::<f32>()?;

        if logits.len() != self.labels.len() {
            bail!(
                "model returned {} scores for {} labels",
                logits.len(),
                self.labels.len()
            );
        }

        let probs = softmax(logits);
        let best = argmax(&probs);
        Ok(ActionPrediction {
            label: self.labels[best].clone(),
            confidence: probs[best],
        })
    }
}
