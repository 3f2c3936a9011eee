// src/config.rs

use crate::error::PipelineError;
use crate::types::Config;
use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const ROLE_PERSON: &str = "person";
pub const ROLE_BALL: &str = "ball";

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to the built-in defaults.
    /// A file that exists but fails to parse is still an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            warn!("Config file {} not found, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Startup validation. Fails fast on an incomplete role mapping or
    /// thresholds no run could work with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.role_class_id(ROLE_PERSON)?;
        self.role_class_id(ROLE_BALL)?;
        if self.role_class_id(ROLE_PERSON)? == self.role_class_id(ROLE_BALL)? {
            return Err(PipelineError::config(
                "roles 'person' and 'ball' map to the same class id",
            ));
        }
        for (role, &class_id) in &self.model.roles {
            if class_id >= self.model.num_classes {
                return Err(PipelineError::config(format!(
                    "role '{}' maps to class id {} but the model declares {} classes",
                    role, class_id, self.model.num_classes
                )));
            }
        }

        check_unit_interval("model.confidence_threshold", self.model.confidence_threshold)?;
        check_unit_interval("model.iou_threshold", self.model.iou_threshold)?;
        check_unit_interval("tracking.iou_threshold", self.tracking.iou_threshold)?;
        check_unit_interval("sequence.min_confidence", self.sequence.min_confidence)?;

        if self.video.frame_stride == 0 {
            return Err(PipelineError::config("video.frame_stride must be >= 1"));
        }
        if self.segmenter.people_window == 0 {
            return Err(PipelineError::config("segmenter.people_window must be >= 1"));
        }
        if self.segmenter.min_duration <= 0.0 {
            return Err(PipelineError::config("segmenter.min_duration must be > 0"));
        }
        if self.segmenter.cooldown < 0.0 {
            return Err(PipelineError::config("segmenter.cooldown must be >= 0"));
        }
        if self.sequence.len == 0 || self.sequence.stride == 0 {
            return Err(PipelineError::config(
                "sequence.len and sequence.stride must be >= 1",
            ));
        }
        if self.sequence.max_tracks == 0 {
            return Err(PipelineError::config("sequence.max_tracks must be >= 1"));
        }
        if self.model.action_labels.is_empty() {
            return Err(PipelineError::config("model.action_labels must not be empty"));
        }
        if self.output.merge_gap < 0.0 {
            return Err(PipelineError::config("output.merge_gap must be >= 0"));
        }
        Ok(())
    }

    /// Class id for a named role, or a configuration error naming the role.
    pub fn role_class_id(&self, role: &str) -> Result<usize, PipelineError> {
        self.model.roles.get(role).copied().ok_or_else(|| {
            PipelineError::config(format!("required role '{}' is not mapped to a class id", role))
        })
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<(), PipelineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}
