// src/video.rs

use crate::error::PipelineError;
use crate::types::Frame;
use anyhow::Result;
use serde::Deserialize;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct VideoMeta {
    pub width: usize,
    pub height: usize,
    pub fps: f64,
    /// Best-effort; 0 when the container does not declare a frame count
    /// and no duration is available to estimate one.
    pub total_frames: u64,
    pub duration: f64,
}

/// Source of decoded frames in arrival order.
pub trait FrameSource {
    fn meta(&self) -> &VideoMeta;
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<usize>,
    height: Option<usize>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// ffprobe rates come as fractions like "30000/1001".
fn parse_fraction(text: &str) -> Option<f64> {
    let mut parts = text.splitn(2, '/');
    let num: f64 = parts.next()?.trim().parse().ok()?;
    let den: f64 = match parts.next() {
        Some(d) => d.trim().parse().ok()?,
        None => 1.0,
    };
    if den == 0.0 || !num.is_finite() {
        return None;
    }
    Some(num / den)
}

fn parse_probe_output(raw: &[u8], path: &Path) -> Result<VideoMeta, PipelineError> {
    let probe: ProbeOutput = serde_json::from_slice(raw)
        .map_err(|e| PipelineError::input(format!("unreadable ffprobe output: {}", e)))?;
    let stream = probe.streams.first().ok_or_else(|| {
        PipelineError::input(format!("no video stream in {}", path.display()))
    })?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(PipelineError::input(format!(
            "video stream in {} has no dimensions",
            path.display()
        )));
    }

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_fraction)
        .unwrap_or(0.0);
    if fps <= 0.0 {
        return Err(PipelineError::input(format!(
            "video stream in {} reports no frame rate",
            path.display()
        )));
    }

    let declared_frames: u64 = stream
        .nb_frames
        .as_deref()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let duration: f64 = stream
        .duration
        .as_deref()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0.0);

    let total_frames = if declared_frames > 0 {
        declared_frames
    } else {
        (duration * fps).round() as u64
    };
    let duration = if duration > 0.0 {
        duration
    } else if total_frames > 0 {
        total_frames as f64 / fps
    } else {
        0.0
    };

    Ok(VideoMeta {
        width,
        height,
        fps,
        total_frames,
        duration,
    })
}

/// Stream properties via ffprobe.
pub fn probe(path: &Path) -> Result<VideoMeta, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::input(format!(
            "video not found: {}",
            path.display()
        )));
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,nb_frames,duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| PipelineError::input(format!("could not run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::input(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    parse_probe_output(&output.stdout, path)
}

/// Decodes frames by piping `ffmpeg -f rawvideo -pix_fmt rgb24` output.
/// Corrupt frames are ffmpeg's problem; whatever reaches the pipe is a
/// complete RGB24 frame.
pub struct FfmpegFrameSource {
    child: Child,
    stdout: ChildStdout,
    meta: VideoMeta,
    frame_index: u64,
}

impl FfmpegFrameSource {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let meta = probe(path)?;
        debug!(
            "Opened {}: {}x{} @ {:.2} fps, ~{} frames",
            path.display(),
            meta.width,
            meta.height,
            meta.fps,
            meta.total_frames
        );

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdout(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::input(format!("could not run ffmpeg: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            PipelineError::input("ffmpeg spawned without a stdout pipe".to_string())
        })?;

        Ok(Self {
            child,
            stdout,
            meta,
            frame_index: 0,
        })
    }
}

impl FrameSource for FfmpegFrameSource {
    fn meta(&self) -> &VideoMeta {
        &self.meta
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame_bytes = self.meta.width * self.meta.height * 3;
        let mut data = vec![0u8; frame_bytes];

        let mut filled = 0;
        while filled < frame_bytes {
            match self.stdout.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            debug!("Frame stream ended after {} frames", self.frame_index);
            return Ok(None);
        }
        if filled < frame_bytes {
            warn!(
                "Discarding truncated trailing frame ({} of {} bytes)",
                filled, frame_bytes
            );
            return Ok(None);
        }

        let index = self.frame_index;
        self.frame_index += 1;
        Ok(Some(Frame {
            data,
            width: self.meta.width,
            height: self.meta.height,
            timestamp: index as f64 / self.meta.fps,
            index,
        }))
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fraction() {
        assert_eq!(parse_fraction("25/1"), Some(25.0));
        let ntsc = parse_fraction("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_fraction("24"), Some(24.0));
        assert_eq!(parse_fraction("0/0"), None);
        assert_eq!(parse_fraction("abc"), None);
    }

    #[test]
    fn test_parse_probe_output_full() {
        let raw = br#"{"streams":[{"width":1920,"height":1080,"r_frame_rate":"25/1","nb_frames":"2500","duration":"100.000000"}]}"#;
        let meta = parse_probe_output(raw, Path::new("match.mp4")).unwrap();
        assert_eq!(meta.width, 1920);
        assert_eq!(meta.height, 1080);
        assert_eq!(meta.fps, 25.0);
        assert_eq!(meta.total_frames, 2500);
        assert!((meta.duration - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_output_estimates_missing_frame_count() {
        let raw = br#"{"streams":[{"width":1280,"height":720,"r_frame_rate":"30000/1001","duration":"10.0"}]}"#;
        let meta = parse_probe_output(raw, Path::new("match.mp4")).unwrap();
        assert_eq!(meta.total_frames, 300); // 10s * 29.97 fps, rounded
    }

    #[test]
    fn test_parse_probe_output_without_video_stream() {
        let raw = br#"{"streams":[]}"#;
        let err = parse_probe_output(raw, Path::new("audio_only.mp4")).unwrap_err();
        assert!(err.to_string().contains("no video stream"));
    }

    #[test]
    fn test_parse_probe_output_rejects_zero_fps() {
        let raw = br#"{"streams":[{"width":640,"height":480,"r_frame_rate":"0/0"}]}"#;
        assert!(parse_probe_output(raw, Path::new("m.mp4")).is_err());
    }

    #[test]
    fn test_probe_missing_file() {
        let err = probe(Path::new("no/such/video.mp4")).unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        assert!(err.to_string().contains("not found"));
    }
}
