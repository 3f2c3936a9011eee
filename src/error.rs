// src/error.rs

use thiserror::Error;

/// Failures that abort the run and cross the process boundary.
///
/// Everything else (a frame that fails to decode, a low-confidence
/// classification, a progress write that fails) is handled where it happens
/// and only degrades the output.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input video cannot be opened or probed.
    #[error("input error: {0}")]
    Input(String),

    /// A required model artifact is missing or failed to load.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The configuration is invalid (bad thresholds, incomplete role mapping).
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
