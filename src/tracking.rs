// src/tracking.rs

use crate::player_detection::calculate_iou;
use crate::types::{Detection, TrackingConfig};
use tracing::debug;

struct ActiveTrack {
    id: u64,
    bbox: [f32; 4],
    misses: u32,
}

/// Greedy IoU association across consecutive processed frames.
///
/// Each detection is matched to the open track it overlaps most, best pairs
/// first; leftovers start new tracks. A track survives `max_misses` frames
/// without a match, which carries ids over short occlusions. Ids are never
/// reused within a run.
pub struct IouTracker {
    tracks: Vec<ActiveTrack>,
    next_id: u64,
    config: TrackingConfig,
    created: u64,
}

impl IouTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            config,
            created: 0,
        }
    }

    pub fn tracks_created(&self) -> u64 {
        self.created
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Fill in `track_id` for every detection, updating tracker state.
    /// The pipeline feeds person detections only.
    pub fn assign(&mut self, detections: &mut [Detection]) {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (t, track) in self.tracks.iter().enumerate() {
            for (d, det) in detections.iter().enumerate() {
                let iou = calculate_iou(&track.bbox, &det.bbox);
                if iou >= self.config.iou_threshold {
                    pairs.push((iou, t, d));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        for (_, t, d) in pairs {
            if track_used[t] || det_used[d] {
                continue;
            }
            track_used[t] = true;
            det_used[d] = true;
            self.tracks[t].bbox = detections[d].bbox;
            self.tracks[t].misses = 0;
            detections[d].track_id = Some(self.tracks[t].id);
        }

        // Unmatched detections open new tracks
        for (d, det) in detections.iter_mut().enumerate() {
            if det_used[d] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.created += 1;
            self.tracks.push(ActiveTrack {
                id,
                bbox: det.bbox,
                misses: 0,
            });
            det.track_id = Some(id);
            debug!("Opened track {}", id);
        }

        // Unmatched tracks age out
        for (t, track) in self.tracks.iter_mut().enumerate() {
            if t < track_used.len() && !track_used[t] {
                track.misses += 1;
            }
        }
        let max_misses = self.config.max_misses;
        self.tracks.retain(|t| t.misses <= max_misses);
    }
}
