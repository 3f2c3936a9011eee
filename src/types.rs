// src/types.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub video: VideoConfig,
    pub tracking: TrackingConfig,
    pub segmenter: SegmenterConfig,
    pub sequence: SequenceConfig,
    pub team: TeamConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub detector_path: String,
    /// Action-classifier artifact. A missing file disables the per-track
    /// classification path; only a missing detector is fatal.
    pub action_path: String,
    pub input_size: usize,
    pub num_classes: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Explicit role -> class id mapping. Must contain "person" and "ball";
    /// checked against `num_classes` at startup.
    pub roles: HashMap<String, usize>,
    pub action_labels: Vec<String>,
    pub crop_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let mut roles = HashMap::new();
        roles.insert("person".to_string(), 0);
        roles.insert("ball".to_string(), 32);
        Self {
            detector_path: "models/yolov8n.onnx".to_string(),
            action_path: "models/action_classifier.onnx".to_string(),
            input_size: 640,
            num_classes: 80,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            roles,
            action_labels: vec![
                "shot".to_string(),
                "pass".to_string(),
                "dribble".to_string(),
                "defence".to_string(),
            ],
            crop_size: 112,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Run detection on every Nth decoded frame.
    pub frame_stride: u64,
    /// Progress-file cadence, in processed frames.
    pub progress_every: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_stride: 5,
            progress_every: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub iou_threshold: f32,
    /// Frames a track survives without a matching detection.
    pub max_misses: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_misses: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Smoothed people count required for active play.
    pub min_people: f32,
    /// Moving-average window over processed frames.
    pub people_window: usize,
    /// Seconds after an emitted event before a new segment may start.
    pub cooldown: f64,
    /// Minimum segment length in seconds; shorter candidates are dropped.
    pub min_duration: f64,
    /// Mean people count below which a segment is labeled a fastbreak.
    pub fastbreak_max_people: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_people: 4.0,
            people_window: 10,
            cooldown: 1.0,
            min_duration: 3.0,
            fastbreak_max_people: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub enabled: bool,
    /// Crops buffered per track before classification is possible.
    pub len: usize,
    /// Processed frames between classifications of the same track.
    pub stride: u64,
    pub min_confidence: f32,
    /// Hard cap on concurrently buffered tracks.
    pub max_tracks: usize,
    /// Evict a buffer after this many processed frames without updates.
    pub ttl_frames: u64,
    /// Drop a track's buffer after an accepted classification. When false,
    /// repeated stride-limited results are left for the merger to absorb.
    pub clear_on_accept: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            len: 20,
            stride: 10,
            min_confidence: 0.6,
            max_tracks: 64,
            ttl_frames: 90,
            clear_on_accept: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Below this many color samples, fitting is a no-op and every
    /// assignment returns the default team.
    pub min_samples: usize,
    /// Processed frames between color-sample collections.
    pub sample_stride: u64,
    pub kmeans_seed: u64,
    pub kmeans_max_iters: usize,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            sample_stride: 3,
            kmeans_seed: 42,
            kmeans_max_iters: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    /// Same-type events closer than this many seconds are merged.
    pub merge_gap: f64,
    /// Seconds added around exported clips.
    pub clip_padding: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
            merge_gap: 2.0,
            clip_padding: 1.0,
        }
    }
}

/// One decoded video frame, RGB24, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp: f64,
    /// Zero-based decode index, counting skipped frames too.
    pub index: u64,
}

/// One detected object in a processed frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in original image coordinates
    pub confidence: f32,
    pub class_id: usize,
    /// Persistent id from the tracker; only person detections carry one.
    pub track_id: Option<u64>,
}

/// Per-processed-frame aggregate fed to the play segmenter.
#[derive(Debug, Clone, Copy)]
pub struct FrameSignal {
    pub timestamp: f64,
    pub num_people: usize,
    pub has_ball: bool,
    /// Arithmetic mean of the people counts over the last
    /// min(window, frames seen) processed frames.
    pub smoothed_avg_people: f32,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct ProcessingStats {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub people_detections: u64,
    pub ball_detections: u64,
    pub tracks_created: u64,
    pub classifications_run: u64,
    pub classifications_accepted: u64,
    pub classifications_rejected: u64,
    pub segments_discarded: u64,
    pub raw_events: usize,
    pub merged_events: usize,
    pub team_samples: usize,
    pub team_model_fitted: bool,
}
