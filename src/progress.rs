// src/progress.rs

use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ProgressPayload {
    status: &'static str,
    progress: u8,
}

/// Percent complete from whatever the container gave us: the frame count
/// when declared, the duration otherwise, zero when neither is known.
pub fn percent_complete(frames_read: u64, total_frames: u64, timestamp: f64, duration: f64) -> u8 {
    if total_frames > 0 {
        return ((frames_read * 100) / total_frames).min(100) as u8;
    }
    if duration > 0.0 {
        return ((timestamp / duration * 100.0) as u64).min(100) as u8;
    }
    0
}

/// Best-effort progress side channel: overwrites a small JSON file so an
/// external caller can poll completion. Write failures are logged once and
/// otherwise ignored; they must never abort the analysis.
pub struct ProgressReporter {
    path: Option<PathBuf>,
    warned: bool,
    last_written: Option<u8>,
}

impl ProgressReporter {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            warned: false,
            last_written: None,
        }
    }

    pub fn report(&mut self, percent: u8) {
        let Some(path) = &self.path else {
            return;
        };
        let percent = percent.min(100);
        if self.last_written == Some(percent) {
            return;
        }

        let payload = ProgressPayload {
            status: "processing",
            progress: percent,
        };
        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(_) => return,
        };
        match fs::write(path, json) {
            Ok(()) => {
                self.last_written = Some(percent);
            }
            Err(e) => {
                if self.warned {
                    debug!("Progress write failed again: {}", e);
                } else {
                    warn!("Could not write progress file {}: {}", path.display(), e);
                    self.warned = true;
                }
            }
        }
    }

    pub fn finish(&mut self) {
        self.report(100);
    }
}
