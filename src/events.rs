// src/events.rs

use serde::{Deserialize, Serialize};

/// Tag on events produced by the play segmenter heuristics.
pub const TAG_AUTO_DETECTED: &str = "auto_detected";
/// Tag on events produced by the per-track action classifier.
pub const TAG_ACTION_MODEL: &str = "action_model";
/// Team label used before the team model has been fitted.
pub const TEAM_UNASSIGNED: &str = "auto";

/// One detected play, a closed interval of video time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayEvent {
    pub time_seconds: f64,
    pub end_time: f64,
    pub event_type: String,
    pub team_id: String,
    pub confidence_score: f32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_path: Option<String>,
}

impl PlayEvent {
    pub fn duration(&self) -> f64 {
        self.end_time - self.time_seconds
    }
}

/// The one JSON object this tool prints on stdout. Consumers parse stdout
/// unconditionally, so both outcomes use this shape and the process always
/// exits 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<PlayEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn completed(events: Vec<PlayEvent>, job_id: String) -> Self {
        Self {
            success: true,
            events: Some(events),
            job_id: Some(job_id),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            events: None,
            job_id: None,
            error: Some(message.into()),
        }
    }
}

/// Confidences are reported with two decimals.
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> PlayEvent {
        PlayEvent {
            time_seconds: 12.5,
            end_time: 27.0,
            event_type: "positional_attack".to_string(),
            team_id: TEAM_UNASSIGNED.to_string(),
            confidence_score: 0.82,
            tags: vec![TAG_AUTO_DETECTED.to_string(), "7 players".to_string()],
            track_id: None,
            clip_path: None,
        }
    }

    #[test]
    fn test_success_json_shape() {
        let result = AnalysisResult::completed(vec![sample_event()], "job_1700000000".to_string());
        let json: serde_json::Value = serde_json::to_value(&result).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["job_id"], "job_1700000000");
        assert_eq!(json["events"][0]["event_type"], "positional_attack");
        assert_eq!(json["events"][0]["time_seconds"], 12.5);
        // Unset optional fields are omitted entirely
        assert!(json.get("error").is_none());
        assert!(json["events"][0].get("track_id").is_none());
        assert!(json["events"][0].get("clip_path").is_none());
    }

    #[test]
    fn test_failure_json_shape() {
        let result = AnalysisResult::failure("input error: video not found");
        let json: serde_json::Value = serde_json::to_value(&result).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "input error: video not found");
        assert!(json.get("events").is_none());
        assert!(json.get("job_id").is_none());
    }

    #[test]
    fn test_event_round_trip() {
        let mut event = sample_event();
        event.track_id = Some(17);
        event.clip_path = Some("output/clip_000.mp4".to_string());

        let json = serde_json::to_string(&event).unwrap();
        let back: PlayEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.track_id, Some(17));
        assert_eq!(back.tags, event.tags);
        assert!((back.duration() - 14.5).abs() < 1e-9);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.666_666), 0.67);
        assert_eq!(round2(0.5), 0.5);
        assert_eq!(round2(0.004), 0.0);
    }
}
