// src/team_assigner.rs

use crate::types::{Frame, TeamConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use tracing::{debug, info};

pub const TEAM_A: &str = "A";
pub const TEAM_B: &str = "B";

// Torso sub-rectangle of a player crop, as fractions of the box. Jersey
// color lives here; legs and background mostly do not.
const TORSO_TOP: f32 = 0.2;
const TORSO_BOTTOM: f32 = 0.6;
const TORSO_LEFT: f32 = 0.25;
const TORSO_RIGHT: f32 = 0.75;

const KMEANS_EPSILON: f32 = 1e-4;

/// One jersey-color observation: mean RGB over a torso region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorSample(pub [f32; 3]);

/// Mean RGB over the torso region of a detection box, or `None` when the
/// clamped region is empty (degenerate or off-screen box).
pub fn torso_color_sample(frame: &Frame, bbox: &[f32; 4]) -> Option<ColorSample> {
    let x1 = bbox[0].max(0.0);
    let y1 = bbox[1].max(0.0);
    let x2 = bbox[2].min(frame.width as f32);
    let y2 = bbox[3].min(frame.height as f32);
    let w = x2 - x1;
    let h = y2 - y1;
    if w <= 1.0 || h <= 1.0 {
        return None;
    }

    let row_start = (y1 + h * TORSO_TOP) as usize;
    let row_end = ((y1 + h * TORSO_BOTTOM) as usize).min(frame.height);
    let col_start = (x1 + w * TORSO_LEFT) as usize;
    let col_end = ((x1 + w * TORSO_RIGHT) as usize).min(frame.width);
    if row_start >= row_end || col_start >= col_end {
        return None;
    }

    let mut sum = [0.0f64; 3];
    let mut count = 0u64;
    for y in row_start..row_end {
        for x in col_start..col_end {
            let idx = (y * frame.width + x) * 3;
            sum[0] += frame.data[idx] as f64;
            sum[1] += frame.data[idx + 1] as f64;
            sum[2] += frame.data[idx + 2] as f64;
            count += 1;
        }
    }

    Some(ColorSample([
        (sum[0] / count as f64) as f32,
        (sum[1] / count as f64) as f32,
        (sum[2] / count as f64) as f32,
    ]))
}

fn dist2(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

/// Unsupervised two-team assignment from jersey colors.
///
/// Two phases: while collecting, every `assign` returns the default team
/// "A". A single `fit()` at stream end clusters the accumulated samples
/// into two frozen centroids; afterwards `assign` is a pure
/// nearest-centroid lookup, ties going to the first cluster.
///
/// Labels "A"/"B" are cluster indices. Which physical team ends up as "A"
/// depends on sample order and seed, so labels are not comparable across
/// runs or videos.
pub struct TeamAssigner {
    config: TeamConfig,
    samples: Vec<[f32; 3]>,
    // Per-track running sum and count, for labeling events after the fit.
    track_samples: HashMap<u64, ([f64; 3], u64)>,
    centroids: Option<[[f32; 3]; 2]>,
}

impl TeamAssigner {
    pub fn new(config: TeamConfig) -> Self {
        Self {
            config,
            samples: Vec::new(),
            track_samples: HashMap::new(),
            centroids: None,
        }
    }

    pub fn add_sample(&mut self, sample: ColorSample, track_id: Option<u64>) {
        self.samples.push(sample.0);
        if let Some(id) = track_id {
            let entry = self.track_samples.entry(id).or_insert(([0.0; 3], 0));
            entry.0[0] += sample.0[0] as f64;
            entry.0[1] += sample.0[1] as f64;
            entry.0[2] += sample.0[2] as f64;
            entry.1 += 1;
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_fitted(&self) -> bool {
        self.centroids.is_some()
    }

    /// Cluster the collected samples. A no-op below the minimum sample
    /// count (the assigner stays in default mode) and after a successful
    /// fit (centroids are frozen). Returns whether a model is fitted.
    pub fn fit(&mut self) -> bool {
        if self.centroids.is_some() {
            return true;
        }
        if self.samples.len() < self.config.min_samples {
            debug!(
                "Team model kept default: {} samples < {} minimum",
                self.samples.len(),
                self.config.min_samples
            );
            return false;
        }

        let mut rng = StdRng::seed_from_u64(self.config.kmeans_seed);

        // First centroid random, second the farthest sample from it. For
        // two separated color groups this starts one centroid in each.
        let first = self.samples[rng.gen_range(0..self.samples.len())];
        let second = self
            .samples
            .iter()
            .max_by(|a, b| {
                dist2(a, &first)
                    .partial_cmp(&dist2(b, &first))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .copied()
            .unwrap_or(first);
        let mut centroids = [first, second];

        let mut iterations = 0;
        for _ in 0..self.config.kmeans_max_iters {
            iterations += 1;

            let mut sums = [[0.0f64; 3]; 2];
            let mut counts = [0u64; 2];
            for sample in &self.samples {
                let cluster = nearest(&centroids, sample);
                for c in 0..3 {
                    sums[cluster][c] += sample[c] as f64;
                }
                counts[cluster] += 1;
            }

            let mut movement = 0.0f32;
            for k in 0..2 {
                if counts[k] == 0 {
                    continue; // keep the previous centroid
                }
                let updated = [
                    (sums[k][0] / counts[k] as f64) as f32,
                    (sums[k][1] / counts[k] as f64) as f32,
                    (sums[k][2] / counts[k] as f64) as f32,
                ];
                movement += dist2(&centroids[k], &updated);
                centroids[k] = updated;
            }

            if movement < KMEANS_EPSILON {
                break;
            }
        }

        info!(
            "✓ Team model fitted from {} color samples ({} iterations)",
            self.samples.len(),
            iterations
        );
        self.centroids = Some(centroids);
        true
    }

    /// Team label for a sample: the default before fitting, the nearest
    /// centroid after.
    pub fn assign(&self, sample: &ColorSample) -> &'static str {
        match &self.centroids {
            None => TEAM_A,
            Some(centroids) => {
                if nearest(centroids, &sample.0) == 1 {
                    TEAM_B
                } else {
                    TEAM_A
                }
            }
        }
    }

    /// Team label for a track, from the mean of its collected samples.
    /// `None` when the model is unfitted or the track contributed nothing.
    pub fn team_for_track(&self, track_id: u64) -> Option<&'static str> {
        self.centroids.as_ref()?;
        let (sum, count) = self.track_samples.get(&track_id)?;
        let mean = ColorSample([
            (sum[0] / *count as f64) as f32,
            (sum[1] / *count as f64) as f32,
            (sum[2] / *count as f64) as f32,
        ]);
        Some(self.assign(&mean))
    }
}

fn nearest(centroids: &[[f32; 3]; 2], sample: &[f32; 3]) -> usize {
    // Strict comparison prefers cluster 0 on ties
    if dist2(sample, &centroids[1]) < dist2(sample, &centroids[0]) {
        1
    } else {
        0
    }
}
