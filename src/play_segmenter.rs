// src/play_segmenter.rs

use crate::events::{round2, PlayEvent, TAG_AUTO_DETECTED, TEAM_UNASSIGNED};
use crate::types::{FrameSignal, SegmenterConfig};
use std::collections::VecDeque;
use tracing::{debug, info};

pub const EVENT_FASTBREAK: &str = "fastbreak";
pub const EVENT_POSITIONAL_ATTACK: &str = "positional_attack";

// ============================================================================
// SIGNAL SMOOTHING
// ============================================================================

/// Moving average over the people counts of the last N processed frames.
/// Until the window fills it averages over however many frames it has seen.
pub struct SignalSmoother {
    window: VecDeque<f32>,
    capacity: usize,
}

impl SignalSmoother {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Push a raw count and return the smoothed average.
    pub fn push(&mut self, num_people: usize) -> f32 {
        self.window.push_back(num_people as f32);
        if self.window.len() > self.capacity {
            self.window.pop_front();
        }
        let sum: f32 = self.window.iter().sum();
        sum / self.window.len() as f32
    }
}

// ============================================================================
// PLAY-TYPE POLICY
// ============================================================================

/// Features of a closed segment, handed to the play-type policy.
#[derive(Debug, Clone)]
pub struct SegmentFeatures {
    pub duration: f64,
    pub mean_people: f32,
    pub peak_people: usize,
}

/// Maps a closed segment to an event type. The built-in policy is a coarse
/// population heuristic; swapping in a learned classifier only replaces
/// this function, not the state machine.
pub type PlayTypePolicy = Box<dyn Fn(&SegmentFeatures) -> String>;

/// Few players on screen usually means a breakaway; a crowded court means a
/// set attack.
pub fn people_count_policy(fastbreak_max_people: f32) -> PlayTypePolicy {
    Box::new(move |features: &SegmentFeatures| {
        if features.mean_people < fastbreak_max_people {
            EVENT_FASTBREAK.to_string()
        } else {
            EVENT_POSITIONAL_ATTACK.to_string()
        }
    })
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    Active,
}

struct ActiveSegment {
    start_time: f64,
    people_counts: Vec<f32>,
    confidences: Vec<f32>,
}

impl ActiveSegment {
    fn observe(&mut self, signal: &FrameSignal, person_confidences: &[f32]) {
        self.people_counts.push(signal.num_people as f32);
        self.confidences.extend_from_slice(person_confidences);
    }

    fn mean_people(&self) -> f32 {
        let sum: f32 = self.people_counts.iter().sum();
        sum / self.people_counts.len().max(1) as f32
    }

    fn peak_people(&self) -> usize {
        self.people_counts.iter().fold(0.0f32, |a, &b| a.max(b)) as usize
    }
}

/// Streaming IDLE/ACTIVE segmentation of play.
///
/// Activity requires the smoothed people count to stay at or above
/// `min_people`; the ball is required to *start* a segment but not to keep
/// it alive, so a temporarily occluded ball does not cut a play in half.
/// Closed segments shorter than `min_duration` are dropped, and after an
/// emitted event a new segment cannot start until `cooldown` seconds have
/// passed.
pub struct PlaySegmenter {
    config: SegmenterConfig,
    policy: PlayTypePolicy,
    state: PlayState,
    segment: Option<ActiveSegment>,
    last_event_end: Option<f64>,
    last_timestamp: Option<f64>,
    discarded_short: u64,
}

impl PlaySegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let policy = people_count_policy(config.fastbreak_max_people);
        Self::with_policy(config, policy)
    }

    pub fn with_policy(config: SegmenterConfig, policy: PlayTypePolicy) -> Self {
        Self {
            config,
            policy,
            state: PlayState::Idle,
            segment: None,
            last_event_end: None,
            last_timestamp: None,
            discarded_short: 0,
        }
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    /// Candidates dropped for being shorter than `min_duration`.
    pub fn discarded_short(&self) -> u64 {
        self.discarded_short
    }

    /// Feed one processed frame. Returns an event when this frame closed a
    /// segment that passed the duration filter.
    ///
    /// `person_confidences` holds the detection confidences of the people in
    /// this frame; their running mean becomes the event confidence.
    pub fn update(
        &mut self,
        signal: &FrameSignal,
        person_confidences: &[f32],
    ) -> Option<PlayEvent> {
        self.last_timestamp = Some(signal.timestamp);

        let is_active = signal.smoothed_avg_people >= self.config.min_people
            && (signal.has_ball || self.state == PlayState::Active);

        match (self.state, is_active) {
            (PlayState::Idle, true) => {
                let past_cooldown = match self.last_event_end {
                    Some(end) => signal.timestamp > end + self.config.cooldown,
                    None => true,
                };
                if past_cooldown {
                    debug!(
                        "Play started at {:.2}s ({:.1} people avg)",
                        signal.timestamp, signal.smoothed_avg_people
                    );
                    let mut segment = ActiveSegment {
                        start_time: signal.timestamp,
                        people_counts: Vec::new(),
                        confidences: Vec::new(),
                    };
                    segment.observe(signal, person_confidences);
                    self.segment = Some(segment);
                    self.state = PlayState::Active;
                }
                None
            }
            (PlayState::Active, true) => {
                if let Some(segment) = self.segment.as_mut() {
                    segment.observe(signal, person_confidences);
                }
                None
            }
            (PlayState::Active, false) => {
                self.state = PlayState::Idle;
                let segment = self.segment.take()?;
                self.close_segment(segment, signal.timestamp)
            }
            (PlayState::Idle, false) => None,
        }
    }

    /// End-of-stream flush: close a still-open segment at the last observed
    /// timestamp, applying the same duration filter.
    pub fn finalize(&mut self) -> Option<PlayEvent> {
        if self.state != PlayState::Active {
            return None;
        }
        self.state = PlayState::Idle;
        let segment = self.segment.take()?;
        let end_time = self.last_timestamp.unwrap_or(segment.start_time);
        debug!("Stream ended while active, flushing segment");
        self.close_segment(segment, end_time)
    }

    fn close_segment(&mut self, segment: ActiveSegment, end_time: f64) -> Option<PlayEvent> {
        let duration = end_time - segment.start_time;
        if duration < self.config.min_duration {
            debug!(
                "Discarded {:.1}s candidate at {:.2}s (minimum {:.1}s)",
                duration, segment.start_time, self.config.min_duration
            );
            self.discarded_short += 1;
            return None;
        }

        let features = SegmentFeatures {
            duration,
            mean_people: segment.mean_people(),
            peak_people: segment.peak_people(),
        };
        let event_type = (self.policy)(&features);

        let confidence = if segment.confidences.is_empty() {
            0.5
        } else {
            let sum: f32 = segment.confidences.iter().sum();
            sum / segment.confidences.len() as f32
        };

        // The cooldown is measured from emitted events only; discarded
        // candidates must not delay the next segment.
        self.last_event_end = Some(end_time);

        info!(
            "✓ {} {:.1}s-{:.1}s ({:.1}s, {:.1} players avg)",
            event_type, segment.start_time, end_time, duration, features.mean_people
        );

        Some(PlayEvent {
            time_seconds: segment.start_time,
            end_time,
            event_type,
            team_id: TEAM_UNASSIGNED.to_string(),
            confidence_score: round2(confidence),
            tags: vec![
                TAG_AUTO_DETECTED.to_string(),
                format!("{} players", features.mean_people as u32),
            ],
            track_id: None,
            clip_path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(t: f64, people: usize, ball: bool, avg: f32) -> FrameSignal {
        FrameSignal {
            timestamp: t,
            num_people: people,
            has_ball: ball,
            smoothed_avg_people: avg,
        }
    }

    fn segmenter() -> PlaySegmenter {
        PlaySegmenter::new(SegmenterConfig::default())
    }

    #[test]
    fn test_smoother_tracks_mean_of_window() {
        let mut smoother = SignalSmoother::new(10);
        assert!((smoother.push(2) - 2.0).abs() < 1e-6);
        assert!((smoother.push(4) - 3.0).abs() < 1e-6);
        assert!((smoother.push(6) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_smoother_drops_oldest_when_full() {
        let mut smoother = SignalSmoother::new(3);
        smoother.push(9);
        smoother.push(3);
        smoother.push(3);
        // 9 falls out of the window here
        let avg = smoother.push(3);
        assert!((avg - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_requires_ball_to_start() {
        let mut seg = segmenter();
        for i in 0..20 {
            let out = seg.update(&signal(i as f64 * 0.5, 8, false, 8.0), &[]);
            assert!(out.is_none());
        }
        assert_eq!(seg.state(), PlayState::Idle);
    }

    #[test]
    fn test_ball_occlusion_does_not_end_active_play() {
        let mut seg = segmenter();
        assert!(seg.update(&signal(0.0, 8, true, 8.0), &[]).is_none());
        assert_eq!(seg.state(), PlayState::Active);

        // Ball disappears but the players stay: still active
        for i in 1..=8 {
            assert!(seg.update(&signal(i as f64, 8, false, 8.0), &[]).is_none());
            assert_eq!(seg.state(), PlayState::Active);
        }

        // Only the people count dropping ends the segment
        let event = seg.update(&signal(9.0, 1, false, 1.0), &[]).unwrap();
        assert_eq!(event.time_seconds, 0.0);
        assert_eq!(event.end_time, 9.0);
        assert_eq!(seg.state(), PlayState::Idle);
    }

    #[test]
    fn test_short_segment_is_discarded_silently() {
        let mut seg = segmenter();
        seg.update(&signal(0.0, 8, true, 8.0), &[]);
        seg.update(&signal(1.0, 8, true, 8.0), &[]);
        let out = seg.update(&signal(2.0, 1, false, 1.0), &[]);

        assert!(out.is_none());
        assert_eq!(seg.discarded_short(), 1);

        // A discarded candidate must not arm the cooldown: the next segment
        // can start right away.
        seg.update(&signal(2.2, 8, true, 8.0), &[]);
        assert_eq!(seg.state(), PlayState::Active);
    }

    #[test]
    fn test_cooldown_blocks_immediate_restart() {
        let mut seg = segmenter();
        seg.update(&signal(0.0, 8, true, 8.0), &[]);
        for i in 1..10 {
            seg.update(&signal(i as f64, 8, true, 8.0), &[]);
        }
        let event = seg.update(&signal(10.0, 1, false, 1.0), &[]).unwrap();
        assert_eq!(event.end_time, 10.0);

        // 10.5 is inside the 1.0s cooldown
        seg.update(&signal(10.5, 8, true, 8.0), &[]);
        assert_eq!(seg.state(), PlayState::Idle);

        // 11.5 is past it
        seg.update(&signal(11.5, 8, true, 8.0), &[]);
        assert_eq!(seg.state(), PlayState::Active);

        for i in 0..10 {
            seg.update(&signal(12.0 + i as f64, 8, true, 8.0), &[]);
        }
        let second = seg.update(&signal(22.0, 1, false, 1.0), &[]).unwrap();
        assert_eq!(second.time_seconds, 11.5);
        assert!(second.time_seconds >= event.end_time + 1.0);
    }

    #[test]
    fn test_confidence_is_mean_of_person_confidences() {
        let mut seg = segmenter();
        seg.update(&signal(0.0, 8, true, 8.0), &[0.9, 0.8]);
        seg.update(&signal(2.0, 8, true, 8.0), &[0.7]);
        let event = seg.update(&signal(5.0, 1, false, 1.0), &[]).unwrap();
        assert!((event.confidence_score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_defaults_without_observations() {
        let mut seg = segmenter();
        seg.update(&signal(0.0, 8, true, 8.0), &[]);
        seg.update(&signal(2.0, 8, true, 8.0), &[]);
        let event = seg.update(&signal(5.0, 1, false, 1.0), &[]).unwrap();
        assert_eq!(event.confidence_score, 0.5);
    }

    #[test]
    fn test_flush_emits_final_event() {
        let mut seg = segmenter();
        seg.update(&signal(0.0, 8, true, 8.0), &[]);
        seg.update(&signal(4.0, 8, true, 8.0), &[]);

        let event = seg.finalize().unwrap();
        assert_eq!(event.time_seconds, 0.0);
        assert_eq!(event.end_time, 4.0);
        assert_eq!(seg.state(), PlayState::Idle);
        // Nothing left to flush
        assert!(seg.finalize().is_none());
    }

    #[test]
    fn test_flush_respects_min_duration() {
        let mut seg = segmenter();
        seg.update(&signal(0.0, 8, true, 8.0), &[]);
        seg.update(&signal(1.5, 8, true, 8.0), &[]);
        assert!(seg.finalize().is_none());
        assert_eq!(seg.discarded_short(), 1);
    }

    #[test]
    fn test_policy_selects_event_type_by_population() {
        let mut seg = segmenter();
        seg.update(&signal(0.0, 4, true, 4.0), &[]);
        for i in 1..=4 {
            seg.update(&signal(i as f64, 4, true, 4.0), &[]);
        }
        let event = seg.update(&signal(5.0, 1, false, 1.0), &[]).unwrap();
        assert_eq!(event.event_type, EVENT_FASTBREAK);

        let mut seg = segmenter();
        seg.update(&signal(20.0, 9, true, 9.0), &[]);
        for i in 1..=4 {
            seg.update(&signal(20.0 + i as f64, 9, true, 9.0), &[]);
        }
        let event = seg.update(&signal(25.0, 1, false, 1.0), &[]).unwrap();
        assert_eq!(event.event_type, EVENT_POSITIONAL_ATTACK);
        assert!(event.tags.contains(&"9 players".to_string()));
    }

    #[test]
    fn test_custom_policy_replaces_heuristic() {
        let mut seg = PlaySegmenter::with_policy(
            SegmenterConfig::default(),
            Box::new(|_| "set_piece".to_string()),
        );
        seg.update(&signal(0.0, 8, true, 8.0), &[]);
        seg.update(&signal(4.0, 8, true, 8.0), &[]);
        let event = seg.finalize().unwrap();
        assert_eq!(event.event_type, "set_piece");
    }

    #[test]
    fn test_two_window_stream_yields_two_events() {
        // 60 seconds at 10 signals/second: crowded with ball in [5,15) and
        // [30,34), near-empty otherwise.
        let mut smoother = SignalSmoother::new(10);
        let mut seg = segmenter();
        let mut events = Vec::new();

        for i in 0..=600u32 {
            let t = i as f64 * 0.1;
            let in_play = (5.0..15.0).contains(&t) || (30.0..34.0).contains(&t);
            let people = if in_play { 8 } else { 1 };
            let confs = vec![0.9f32; people];
            let avg = smoother.push(people);
            let sig = signal(t, people, in_play, avg);
            if let Some(event) = seg.update(&sig, &confs) {
                events.push(event);
            }
        }
        if let Some(event) = seg.finalize() {
            events.push(event);
        }

        assert_eq!(events.len(), 2);

        // First window: the moving average delays both edges by a few frames
        assert!(events[0].time_seconds > 5.0 && events[0].time_seconds < 6.5);
        assert!(events[0].end_time > 15.0 && events[0].end_time < 16.5);

        // Second window survives the duration filter (4s >= 3s)
        assert!(events[1].time_seconds >= 30.0 && events[1].time_seconds < 31.5);
        assert!(events[1].end_time > 34.0 && events[1].end_time < 35.5);

        for event in &events {
            assert!(event.duration() >= 3.0);
            assert_eq!(event.event_type, EVENT_POSITIONAL_ATTACK);
            assert!((event.confidence_score - 0.9).abs() < 1e-6);
        }
        assert!(events[1].time_seconds >= events[0].end_time + 1.0);
    }
}
