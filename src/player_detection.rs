// src/player_detection.rs

use crate::config::{ROLE_BALL, ROLE_PERSON};
use crate::error::PipelineError;
use crate::tracking::IouTracker;
use crate::types::{Config, Detection, Frame};
use anyhow::{bail, Result};
use ndarray::ArrayView2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{debug, info};

/// Gray letterbox padding, the value YOLO models are trained with.
const LETTERBOX_FILL: u8 = 114;

/// Per-frame detection contract. Implementations own whatever state they
/// need for track-id continuity across calls and must tolerate frames with
/// nothing in them.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Class ids for the two roles this pipeline consumes, resolved from the
/// configured mapping at startup instead of guessed from model metadata.
#[derive(Debug, Clone, Copy)]
pub struct RoleClasses {
    pub person: usize,
    pub ball: usize,
}

impl RoleClasses {
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        Ok(Self {
            person: config.role_class_id(ROLE_PERSON)?,
            ball: config.role_class_id(ROLE_BALL)?,
        })
    }
}

/// YOLO-family ONNX detector for people and the ball, with built-in track
/// association for the people.
pub struct YoloDetector {
    session: Session,
    tracker: IouTracker,
    roles: RoleClasses,
    input_size: usize,
    num_classes: usize,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let model_path = &config.model.detector_path;
        if !Path::new(model_path).exists() {
            return Err(PipelineError::model_unavailable(format!(
                "detector model not found: {}",
                model_path
            )));
        }
        let roles = RoleClasses::from_config(config)?;

        info!("Loading detector model: {}", model_path);
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(4))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                PipelineError::model_unavailable(format!("{}: {}", model_path, e))
            })?;
        info!(
            "✓ Detector ready (person=class {}, ball=class {})",
            roles.person, roles.ball
        );

        Ok(Self {
            session,
            tracker: IouTracker::new(config.tracking.clone()),
            roles,
            input_size: config.model.input_size,
            num_classes: config.model.num_classes,
            confidence_threshold: config.model.confidence_threshold,
            iou_threshold: config.model.iou_threshold,
        })
    }

    pub fn tracks_created(&self) -> u64 {
        self.tracker.tracks_created()
    }

    fn infer(&mut self, input: Vec<f32>) -> Result<Vec<f32>> {
        let shape = [1, 3, self.input_size, self.input_size];
        let value = ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;
        let outputs = self.session.run(ort::inputs!["images" => value])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, scale, pad_x, pad_y) =
            letterbox(&frame.data, frame.width, frame.height, self.input_size);
        let output = self.infer(input)?;
        let detections = decode_predictions(
            &output,
            self.num_classes,
            self.roles,
            self.confidence_threshold,
            self.iou_threshold,
            scale,
            pad_x,
            pad_y,
        )?;

        // Only people get persistent ids; the ball is matched by class alone.
        let roles = self.roles;
        let (mut people, balls): (Vec<_>, Vec<_>) = detections
            .into_iter()
            .partition(|d| d.class_id == roles.person);
        self.tracker.assign(&mut people);

        debug!(
            "Frame {}: {} people, {} ball(s)",
            frame.index,
            people.len(),
            balls.len()
        );
        people.extend(balls);
        Ok(people)
    }
}

/// Scale into a square canvas preserving aspect ratio, pad with gray, and
/// emit normalized CHW floats. Returns the tensor plus the scale and
/// padding needed to map boxes back to source coordinates.
fn letterbox(src: &[u8], src_w: usize, src_h: usize, target: usize) -> (Vec<f32>, f32, f32, f32) {
    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let scaled_w = (src_w as f32 * scale) as usize;
    let scaled_h = (src_h as f32 * scale) as usize;
    let pad_x = (target - scaled_w) as f32 / 2.0;
    let pad_y = (target - scaled_h) as f32 / 2.0;

    let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

    let mut canvas = vec![LETTERBOX_FILL; target * target * 3];
    for y in 0..scaled_h {
        for x in 0..scaled_w {
            let src_idx = (y * scaled_w + x) * 3;
            let dst_x = x + pad_x as usize;
            let dst_y = y + pad_y as usize;
            let dst_idx = (dst_y * target + dst_x) * 3;
            canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
        }
    }

    // [0, 255] HWC -> [0, 1] CHW
    let mut input = vec![0.0f32; 3 * target * target];
    for c in 0..3 {
        for h in 0..target {
            for w in 0..target {
                let hwc_idx = (h * target + w) * 3 + c;
                let chw_idx = c * target * target + h * target + w;
                input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
            }
        }
    }

    (input, scale, pad_x, pad_y)
}

fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

/// Decode YOLO output of shape [1, 4 + num_classes, predictions]: keep the
/// person/ball rows above the confidence threshold, map boxes back through
/// the letterbox transform, then suppress duplicates per class.
#[allow(clippy::too_many_arguments)]
fn decode_predictions(
    data: &[f32],
    num_classes: usize,
    roles: RoleClasses,
    confidence_threshold: f32,
    iou_threshold: f32,
    scale: f32,
    pad_x: f32,
    pad_y: f32,
) -> Result<Vec<Detection>> {
    let rows = 4 + num_classes;
    if data.is_empty() || data.len() % rows != 0 {
        bail!(
            "unexpected detector output size {} for {} classes",
            data.len(),
            num_classes
        );
    }
    let predictions = data.len() / rows;
    let view = ArrayView2::from_shape((rows, predictions), data)?;

    let mut people = Vec::new();
    let mut balls = Vec::new();
    for i in 0..predictions {
        let mut best_class = 0usize;
        let mut best_conf = 0.0f32;
        for c in 0..num_classes {
            let conf = view[[4 + c, i]];
            if conf > best_conf {
                best_conf = conf;
                best_class = c;
            }
        }
        if best_conf < confidence_threshold {
            continue;
        }
        if best_class != roles.person && best_class != roles.ball {
            continue;
        }

        let cx = view[[0, i]];
        let cy = view[[1, i]];
        let w = view[[2, i]];
        let h = view[[3, i]];

        let detection = Detection {
            bbox: [
                (cx - w / 2.0 - pad_x) / scale,
                (cy - h / 2.0 - pad_y) / scale,
                (cx + w / 2.0 - pad_x) / scale,
                (cy + h / 2.0 - pad_y) / scale,
            ],
            confidence: best_conf,
            class_id: best_class,
            track_id: None,
        };
        if best_class == roles.person {
            people.push(detection);
        } else {
            balls.push(detection);
        }
    }

    // NMS per class, so a ball overlapping a player is not suppressed by
    // the stronger person box.
    let mut detections = nms(people, iou_threshold);
    detections.extend(nms(balls, iou_threshold));
    Ok(detections)
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    while !detections.is_empty() {
        let current = detections.remove(0);
        detections.retain(|det| calculate_iou(&current.bbox, &det.bbox) < iou_threshold);
        keep.push(current);
    }
    keep
}

pub(crate) fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
