// src/clip_export.rs

use crate::events::PlayEvent;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// The source window for an event's clip: padded on both sides, clamped
/// at the start of the video. Returns (start, duration).
fn cut_window(event: &PlayEvent, padding: f64) -> (f64, f64) {
    let start = (event.time_seconds - padding).max(0.0);
    let duration = event.end_time + padding - start;
    (start, duration)
}

fn clip_file_name(index: usize) -> String {
    format!("clip_{:03}.mp4", index)
}

/// Cuts one clip per event out of the source video with ffmpeg stream
/// copy. No re-encode, so cuts snap to keyframes; good enough for review
/// clips.
pub struct ClipExporter {
    source: PathBuf,
    out_dir: PathBuf,
    padding: f64,
}

impl ClipExporter {
    pub fn new(source: PathBuf, out_dir: PathBuf, padding: f64) -> Self {
        Self {
            source,
            out_dir,
            padding,
        }
    }

    /// Export every event's clip, filling `clip_path` on success. A failed
    /// clip is logged and skipped; the events themselves are already final.
    pub fn export_all(&self, events: &mut [PlayEvent]) -> usize {
        if events.is_empty() {
            return 0;
        }
        if let Err(e) = fs::create_dir_all(&self.out_dir) {
            warn!(
                "Could not create clip directory {}: {}",
                self.out_dir.display(),
                e
            );
            return 0;
        }

        let mut exported = 0;
        for (index, event) in events.iter_mut().enumerate() {
            let dest = self.out_dir.join(clip_file_name(index));
            match self.export_one(event, &dest) {
                Ok(()) => {
                    event.clip_path = Some(dest.to_string_lossy().into_owned());
                    exported += 1;
                }
                Err(e) => {
                    warn!("Clip export failed for event {}: {:#}", index, e);
                }
            }
        }
        info!("💾 Exported {} clip(s) to {}", exported, self.out_dir.display());
        exported
    }

    fn export_one(&self, event: &PlayEvent, dest: &Path) -> Result<()> {
        let (start, duration) = cut_window(event, self.padding);
        let status = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &format!("{:.3}", start), "-i"])
            .arg(&self.source)
            .args(["-t", &format!("{:.3}", duration), "-c", "copy", "-y"])
            .arg(dest)
            .status()
            .context("could not run ffmpeg")?;
        if !status.success() {
            bail!("ffmpeg exited with {}", status);
        }
        if !dest.exists() {
            bail!("ffmpeg reported success but wrote nothing");
        }
        Ok(())
    }
}
