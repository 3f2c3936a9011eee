// src/pipeline.rs

use crate::action_classifier::{prepare_crop, ActionClassifier};
use crate::events::{round2, PlayEvent, TAG_ACTION_MODEL, TEAM_UNASSIGNED};
use crate::merger::{merge_events, sort_chronological};
use crate::play_segmenter::{PlaySegmenter, SignalSmoother};
use crate::player_detection::{Detector, RoleClasses};
use crate::progress::{percent_complete, ProgressReporter};
use crate::sequence_buffer::TrackArena;
use crate::team_assigner::{torso_color_sample, TeamAssigner};
use crate::types::{Config, FrameSignal, ProcessingStats};
use crate::video::FrameSource;
use anyhow::Result;
use tracing::{debug, info, warn};

pub struct PipelineOutput {
    pub events: Vec<PlayEvent>,
    pub stats: ProcessingStats,
}

/// Drive one video through detection, segmentation, per-track
/// classification and team assignment, and return the merged event list.
///
/// Frames arrive strictly in order and everything downstream depends on
/// that: the segmenter's cooldown and stickiness read monotonically
/// increasing timestamps. A frame whose detection fails is logged and
/// skipped; the stream position still advances.
pub fn run(
    source: &mut dyn FrameSource,
    detector: &mut dyn Detector,
    mut classifier: Option<&mut dyn ActionClassifier>,
    config: &Config,
    progress: &mut ProgressReporter,
) -> Result<PipelineOutput> {
    let meta = source.meta().clone();
    let roles = RoleClasses::from_config(config)?;

    let mut stats = ProcessingStats::default();
    let mut smoother = SignalSmoother::new(config.segmenter.people_window);
    let mut segmenter = PlaySegmenter::new(config.segmenter.clone());
    let mut arena = TrackArena::new(config.sequence.clone());
    let mut team = TeamAssigner::new(config.team.clone());
    let mut raw_events: Vec<PlayEvent> = Vec::new();

    let frame_stride = config.video.frame_stride.max(1);
    let progress_every = config.video.progress_every.max(1);
    let sample_stride = config.team.sample_stride.max(1);
    let classify_window = config.sequence.len as f64 / meta.fps.max(1.0);

    let mut processed: u64 = 0;

    while let Some(frame) = source.next_frame()? {
        stats.frames_read += 1;
        if frame.index % frame_stride != 0 {
            continue;
        }
        processed += 1;
        stats.frames_processed = processed;

        if processed % progress_every == 0 {
            progress.report(percent_complete(
                stats.frames_read,
                meta.total_frames,
                frame.timestamp,
                meta.duration,
            ));
        }
        if processed % 100 == 0 {
            info!(
                "Progress: frame {}/{} ({} events so far)",
                stats.frames_read,
                meta.total_frames,
                raw_events.len()
            );
        }

        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Frame {}: detection failed, skipping: {:#}", frame.index, e);
                stats.frames_failed += 1;
                continue;
            }
        };

        let people: Vec<_> = detections
            .iter()
            .filter(|d| d.class_id == roles.person)
            .collect();
        let has_ball = detections.iter().any(|d| d.class_id == roles.ball);
        let person_confidences: Vec<f32> = people.iter().map(|d| d.confidence).collect();

        stats.people_detections += people.len() as u64;
        if has_ball {
            stats.ball_detections += 1;
        }

        let signal = FrameSignal {
            timestamp: frame.timestamp,
            num_people: people.len(),
            has_ball,
            smoothed_avg_people: smoother.push(people.len()),
        };
        debug!(
            "Frame {}: {} people (avg {:.1}), ball={}",
            frame.index, signal.num_people, signal.smoothed_avg_people, signal.has_ball
        );
        if let Some(event) = segmenter.update(&signal, &person_confidences) {
            raw_events.push(event);
        }

        // Per-track sequence classification
        if config.sequence.enabled {
            if let Some(clf) = classifier.as_deref_mut() {
                for det in &people {
                    if let Some(track_id) = det.track_id {
                        if let Some(crop) = prepare_crop(&frame, &det.bbox, config.model.crop_size)
                        {
                            arena.push(track_id, crop, processed);
                        }
                    }
                }

                for track_id in arena.due_tracks(processed) {
                    let outcome = {
                        let Some(sequence) = arena.sequence(track_id) else {
                            continue;
                        };
                        stats.classifications_run += 1;
                        clf.classify(sequence)
                    };
                    match outcome {
                        Ok(prediction) => {
                            let accepted = prediction.confidence >= config.sequence.min_confidence;
                            arena.note_classified(track_id, processed, accepted);
                            if accepted {
                                stats.classifications_accepted += 1;
                                info!(
                                    "✓ {} by track {} at {:.1}s ({:.2})",
                                    prediction.label,
                                    track_id,
                                    frame.timestamp,
                                    prediction.confidence
                                );
                                raw_events.push(PlayEvent {
                                    time_seconds: (frame.timestamp - classify_window).max(0.0),
                                    end_time: frame.timestamp,
                                    event_type: prediction.label,
                                    team_id: TEAM_UNASSIGNED.to_string(),
                                    confidence_score: round2(prediction.confidence),
                                    tags: vec![TAG_ACTION_MODEL.to_string()],
                                    track_id: Some(track_id),
                                    clip_path: None,
                                });
                            } else {
                                stats.classifications_rejected += 1;
                                debug!(
                                    "Dropped {} for track {} ({:.2} below threshold)",
                                    prediction.label, track_id, prediction.confidence
                                );
                            }
                        }
                        Err(e) => {
                            arena.note_classified(track_id, processed, false);
                            warn!("Classification failed for track {}: {:#}", track_id, e);
                        }
                    }
                }
            }
        }

        // Jersey color collection for the team model
        if processed % sample_stride == 0 {
            for det in &people {
                if let Some(sample) = torso_color_sample(&frame, &det.bbox) {
                    team.add_sample(sample, det.track_id);
                }
            }
        }

        arena.sweep(processed);
    }

    // End of stream: flush, fit, label, merge
    if let Some(event) = segmenter.finalize() {
        raw_events.push(event);
    }
    stats.segments_discarded = segmenter.discarded_short();
    stats.tracks_created = arena.tracks_created();
    stats.team_samples = team.sample_count();
    stats.raw_events = raw_events.len();

    stats.team_model_fitted = team.fit();
    if stats.team_model_fitted {
        for event in &mut raw_events {
            if let Some(track_id) = event.track_id {
                if let Some(label) = team.team_for_track(track_id) {
                    event.team_id = label.to_string();
                }
            }
        }
    }

    sort_chronological(&mut raw_events);
    let events = merge_events(raw_events, config.output.merge_gap);
    stats.merged_events = events.len();

    progress.finish();

    info!("✓ Analysis complete");
    info!(
        "  Frames: {} read, {} processed, {} failed",
        stats.frames_read, stats.frames_processed, stats.frames_failed
    );
    info!(
        "  Detections: {} people, {} frames with ball",
        stats.people_detections, stats.ball_detections
    );
    info!(
        "  Events: {} raw -> {} merged ({} too short)",
        stats.raw_events, stats.merged_events, stats.segments_discarded
    );
    if stats.classifications_run > 0 {
        info!(
            "  Classifier: {} runs, {} accepted, {} rejected",
            stats.classifications_run,
            stats.classifications_accepted,
            stats.classifications_rejected
        );
    }
    info!(
        "  Team model: {} ({} samples)",
        if stats.team_model_fitted {
            "fitted"
        } else {
            "default"
        },
        stats.team_samples
    );

    Ok(PipelineOutput { events, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_classifier::{ActionPrediction, PreparedCrop};
    use crate::play_segmenter::EVENT_POSITIONAL_ATTACK;
    use crate::types::{Detection, Frame};
    use crate::video::VideoMeta;
    use anyhow::bail;

    struct SyntheticSource {
        meta: VideoMeta,
        current: u64,
    }

    impl SyntheticSource {
        fn new(total_frames: u64, fps: f64) -> Self {
            Self {
                meta: VideoMeta {
                    width: 640,
                    height: 480,
                    fps,
                    total_frames,
                    duration: total_frames as f64 / fps,
                },
                current: 0,
            }
        }
    }

    impl FrameSource for SyntheticSource {
        fn meta(&self) -> &VideoMeta {
            &self.meta
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.current >= self.meta.total_frames {
                return Ok(None);
            }
            let index = self.current;
            self.current += 1;
            Ok(Some(Frame {
                data: vec![40u8; 640 * 480 * 3],
                width: 640,
                height: 480,
                timestamp: index as f64 / self.meta.fps,
                index,
            }))
        }
    }

    /// Scripted detections: `count` people (stable ids) plus a ball inside
    /// the given windows, `base_people` people elsewhere.
    struct ScriptedDetector {
        windows: Vec<(f64, f64, usize)>,
        base_people: usize,
        confidence: f32,
        fail_every: Option<u64>,
        calls: u64,
    }

    impl ScriptedDetector {
        fn new(windows: Vec<(f64, f64, usize)>, base_people: usize) -> Self {
            Self {
                windows,
                base_people,
                confidence: 0.9,
                fail_every: None,
                calls: 0,
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
            self.calls += 1;
            if let Some(n) = self.fail_every {
                if self.calls % n == 0 {
                    bail!("scripted decode failure");
                }
            }

            let t = frame.timestamp;
            let window = self.windows.iter().find(|w| t >= w.0 && t < w.1);
            let count = window.map(|w| w.2).unwrap_or(self.base_people);

            let mut detections = Vec::new();
            for i in 0..count {
                let x = (i * 70 + 5) as f32;
                detections.push(Detection {
                    bbox: [x, 100.0, x + 50.0, 300.0],
                    confidence: self.confidence,
                    class_id: 0,
                    track_id: Some(i as u64 + 1),
                });
            }
            if window.is_some() {
                detections.push(Detection {
                    bbox: [300.0, 200.0, 320.0, 220.0],
                    confidence: 0.6,
                    class_id: 32,
                    track_id: None,
                });
            }
            Ok(detections)
        }
    }

    struct MockClassifier {
        label: String,
        confidence: f32,
        calls: u64,
    }

    impl MockClassifier {
        fn new(label: &str, confidence: f32) -> Self {
            Self {
                label: label.to_string(),
                confidence,
                calls: 0,
            }
        }
    }

    impl ActionClassifier for MockClassifier {
        fn classify(&mut self, sequence: &[PreparedCrop]) -> Result<ActionPrediction> {
            assert!(!sequence.is_empty());
            self.calls += 1;
            Ok(ActionPrediction {
                label: self.label.clone(),
                confidence: self.confidence,
            })
        }
    }

    fn test_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_two_play_windows_give_two_events() {
        // 60s at 30 fps, crowd + ball in [5,15) and [30,34)
        let mut source = SyntheticSource::new(1800, 30.0);
        let mut detector =
            ScriptedDetector::new(vec![(5.0, 15.0, 8), (30.0, 34.0, 8)], 1);
        let config = test_config();
        let mut progress = ProgressReporter::new(None);

        let output = run(&mut source, &mut detector, None, &config, &mut progress).unwrap();

        assert_eq!(output.events.len(), 2);
        let first = &output.events[0];
        let second = &output.events[1];

        assert!(first.time_seconds > 5.0 && first.time_seconds < 6.5);
        assert!(first.end_time > 15.0 && first.end_time < 16.5);
        assert!(second.time_seconds >= 30.0 && second.time_seconds < 31.5);
        assert!(second.time_seconds >= first.end_time + 1.0);

        for event in &output.events {
            assert!(event.duration() >= 3.0);
            assert_eq!(event.event_type, EVENT_POSITIONAL_ATTACK);
            assert_eq!(event.team_id, TEAM_UNASSIGNED);
            assert!((event.confidence_score - 0.9).abs() < 1e-6);
        }

        assert_eq!(output.stats.frames_read, 1800);
        assert_eq!(output.stats.frames_processed, 360);
        assert_eq!(output.stats.raw_events, 2);
        assert_eq!(output.stats.merged_events, 2);
    }

    #[test]
    fn test_empty_stream_yields_no_events() {
        let mut source = SyntheticSource::new(100, 25.0);
        let mut detector = ScriptedDetector::new(vec![], 0);
        let config = test_config();
        let mut progress = ProgressReporter::new(None);

        let output = run(&mut source, &mut detector, None, &config, &mut progress).unwrap();

        assert!(output.events.is_empty());
        assert_eq!(output.stats.frames_processed, 20);
        assert!(!output.stats.team_model_fitted);
    }

    #[test]
    fn test_detection_failures_skip_frames_but_finish() {
        let mut source = SyntheticSource::new(200, 25.0);
        let mut detector = ScriptedDetector::new(vec![], 2);
        detector.fail_every = Some(3);
        let config = test_config();
        let mut progress = ProgressReporter::new(None);

        let output = run(&mut source, &mut detector, None, &config, &mut progress).unwrap();

        assert!(output.stats.frames_failed > 0);
        assert_eq!(output.stats.frames_processed, 40);
        assert!(output.events.is_empty());
    }

    fn action_config(clear_on_accept: bool) -> Config {
        let mut config = Config::default();
        config.model.crop_size = 16;
        config.sequence.len = 4;
        config.sequence.stride = 3;
        config.sequence.clear_on_accept = clear_on_accept;
        config
    }

    #[test]
    fn test_action_events_merge_into_one() {
        // Two tracked players on screen for 10s at 10 fps
        let mut source = SyntheticSource::new(100, 10.0);
        let mut detector = ScriptedDetector::new(vec![], 2);
        let mut classifier = MockClassifier::new("shot", 0.95);
        let config = action_config(true);
        let mut progress = ProgressReporter::new(None);

        let output = run(
            &mut source,
            &mut detector,
            Some(&mut classifier),
            &config,
            &mut progress,
        )
        .unwrap();

        // Windows fill at processed frame 4, then refill every 4 frames:
        // 5 firings per track, all the same label, all within the merge gap
        assert_eq!(classifier.calls, 10);
        assert_eq!(output.stats.classifications_run, 10);
        assert_eq!(output.stats.classifications_accepted, 10);
        assert_eq!(output.stats.raw_events, 10);
        assert_eq!(output.events.len(), 1);

        let event = &output.events[0];
        assert_eq!(event.event_type, "shot");
        assert!(event.tags.contains(&TAG_ACTION_MODEL.to_string()));
        assert!((event.confidence_score - 0.95).abs() < 1e-6);
        // Identical jerseys cluster into one team; ties pick the first
        assert_eq!(event.team_id, "A");
    }

    #[test]
    fn test_duplicate_firings_without_clearing_still_merge() {
        let mut source = SyntheticSource::new(100, 10.0);
        let mut detector = ScriptedDetector::new(vec![], 2);
        let mut classifier = MockClassifier::new("shot", 0.95);
        let config = action_config(false);
        let mut progress = ProgressReporter::new(None);

        let output = run(
            &mut source,
            &mut detector,
            Some(&mut classifier),
            &config,
            &mut progress,
        )
        .unwrap();

        // The window never clears, so the stride alone gates firings:
        // processed frames 4, 7, 10, 13, 16, 19 per track
        assert_eq!(output.stats.classifications_run, 12);
        assert_eq!(output.stats.raw_events, 12);
        // The merger still collapses them to a single event
        assert_eq!(output.events.len(), 1);
    }

    #[test]
    fn test_low_confidence_predictions_are_dropped() {
        let mut source = SyntheticSource::new(100, 10.0);
        let mut detector = ScriptedDetector::new(vec![], 2);
        let mut classifier = MockClassifier::new("shot", 0.4);
        let config = action_config(true);
        let mut progress = ProgressReporter::new(None);

        let output = run(
            &mut source,
            &mut detector,
            Some(&mut classifier),
            &config,
            &mut progress,
        )
        .unwrap();

        assert!(output.stats.classifications_run > 0);
        assert_eq!(output.stats.classifications_accepted, 0);
        assert!(output.stats.classifications_rejected > 0);
        assert!(output.events.is_empty());
    }

    #[test]
    fn test_progress_file_reaches_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut source = SyntheticSource::new(1000, 25.0);
        let mut detector = ScriptedDetector::new(vec![], 1);
        let config = test_config();
        let mut progress = ProgressReporter::new(Some(path.clone()));

        run(&mut source, &mut detector, None, &config, &mut progress).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["progress"], 100);
    }
}
