// src/sequence_buffer.rs

use crate::action_classifier::PreparedCrop;
use crate::types::SequenceConfig;
use std::collections::HashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Window of recent crops for one track.
///
/// Append-only ring: once `len` samples are buffered the oldest is dropped
/// on every push. Classification needs the window exactly full, and runs at
/// most once every `stride` processed frames per track.
struct TrackSequenceBuffer {
    samples: VecDeque<PreparedCrop>,
    /// Processed-frame index of the most recent push.
    last_update: u64,
    /// Processed-frame index of the most recent classification attempt.
    last_classified: Option<u64>,
}

impl TrackSequenceBuffer {
    fn new(capacity: usize, frame_idx: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            last_update: frame_idx,
            last_classified: None,
        }
    }

    fn push(&mut self, crop: PreparedCrop, capacity: usize, frame_idx: u64) {
        if self.samples.len() == capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(crop);
        self.last_update = frame_idx;
    }

    fn due(&self, capacity: usize, stride: u64, frame_idx: u64) -> bool {
        if self.samples.len() != capacity {
            return false;
        }
        match self.last_classified {
            None => true,
            Some(last) => frame_idx.saturating_sub(last) >= stride,
        }
    }
}

/// Bounded map of track id to sequence buffer.
///
/// Memory stays bounded two ways: inserting beyond `max_tracks` evicts the
/// least recently updated buffer, and `sweep` drops buffers idle longer
/// than `ttl_frames`. Tracks that merely went briefly unmatched survive;
/// tracks that left the scene do not.
pub struct TrackArena {
    buffers: HashMap<u64, TrackSequenceBuffer>,
    config: SequenceConfig,
    tracks_created: u64,
    evicted: u64,
}

impl TrackArena {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            buffers: HashMap::new(),
            config,
            tracks_created: 0,
            evicted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn tracks_created(&self) -> u64 {
        self.tracks_created
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Append a crop to a track's window, creating the buffer on first
    /// sight of the id.
    pub fn push(&mut self, track_id: u64, crop: PreparedCrop, frame_idx: u64) {
        if !self.buffers.contains_key(&track_id) {
            if self.buffers.len() >= self.config.max_tracks {
                self.evict_least_recent();
            }
            self.buffers
                .insert(track_id, TrackSequenceBuffer::new(self.config.len, frame_idx));
            self.tracks_created += 1;
        }
        if let Some(buffer) = self.buffers.get_mut(&track_id) {
            buffer.push(crop, self.config.len, frame_idx);
        }
    }

    /// Tracks whose windows are full and past the per-track stride,
    /// in ascending id order for deterministic scheduling.
    pub fn due_tracks(&self, frame_idx: u64) -> Vec<u64> {
        let mut due: Vec<u64> = self
            .buffers
            .iter()
            .filter(|(_, b)| b.due(self.config.len, self.config.stride, frame_idx))
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();
        due
    }

    /// The full window for a track, oldest crop first.
    pub fn sequence(&mut self, track_id: u64) -> Option<&[PreparedCrop]> {
        self.buffers
            .get_mut(&track_id)
            .map(|b| &*b.samples.make_contiguous())
    }

    /// Record a classification attempt. An accepted result clears the
    /// window when `clear_on_accept` is set, so the same sequence cannot
    /// fire twice; otherwise the stride alone limits repeats and the event
    /// merger absorbs the duplicates.
    pub fn note_classified(&mut self, track_id: u64, frame_idx: u64, accepted: bool) {
        if let Some(buffer) = self.buffers.get_mut(&track_id) {
            buffer.last_classified = Some(frame_idx);
            if accepted && self.config.clear_on_accept {
                buffer.samples.clear();
            }
        }
    }

    /// Drop buffers that have not been updated for `ttl_frames`.
    pub fn sweep(&mut self, frame_idx: u64) {
        let ttl = self.config.ttl_frames;
        let before = self.buffers.len();
        self.buffers
            .retain(|_, b| frame_idx.saturating_sub(b.last_update) <= ttl);
        let removed = before - self.buffers.len();
        if removed > 0 {
            self.evicted += removed as u64;
            debug!("Evicted {} stale track buffer(s)", removed);
        }
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .buffers
            .iter()
            .min_by_key(|&(id, b)| (b.last_update, *id))
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            self.buffers.remove(&id);
            self.evicted += 1;
            debug!("Evicted track {} (arena at capacity)", id);
        }
    }
}
