// src/main.rs

mod action_classifier;
mod clip_export;
mod config;
mod error;
mod events;
mod merger;
mod pipeline;
mod play_segmenter;
mod player_detection;
mod progress;
mod sequence_buffer;
mod team_assigner;
mod tracking;
mod types;
mod video;

use crate::action_classifier::{ActionClassifier, OnnxActionClassifier};
use crate::clip_export::ClipExporter;
use crate::events::AnalysisResult;
use crate::player_detection::YoloDetector;
use crate::progress::ProgressReporter;
use crate::types::Config;
use crate::video::{FfmpegFrameSource, FrameSource};
use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "play-detection", about = "Detects plays in basketball game footage")]
struct Args {
    /// Path to the input video
    #[arg(long)]
    video: PathBuf,

    /// JSON file updated with processing progress
    #[arg(long)]
    progress_file: Option<PathBuf>,

    /// Cut one clip per detected event into the output directory
    #[arg(long)]
    export_clips: bool,

    /// Configuration file
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Override the configured output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("play_detection=info,ort=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("🏀 Play Detection Starting");

    let args = Args::parse();

    // The caller reads one JSON object from stdout no matter what went
    // wrong, so failures are reported in-band and the exit code stays 0.
    let result = match analyze(&args) {
        Ok(result) => result,
        Err(e) => {
            warn!("Analysis failed: {:#}", e);
            AnalysisResult::failure(format!("{e:#}"))
        }
    };

    match serde_json::to_string(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{{\"success\":false,\"error\":\"failed to serialize result: {e}\"}}"),
    }
}

fn analyze(args: &Args) -> Result<AnalysisResult> {
    let mut config = Config::load_or_default(&args.config)?;
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.to_string_lossy().into_owned();
    }
    config.validate()?;
    info!("✓ Configuration loaded from {}", args.config);

    let mut progress = ProgressReporter::new(args.progress_file.clone());

    let mut source = FfmpegFrameSource::open(&args.video)?;
    let meta = source.meta().clone();
    info!(
        "✓ Video opened: {}x{} @ {:.2} fps, {:.1}s",
        meta.width, meta.height, meta.fps, meta.duration
    );

    let mut detector = YoloDetector::new(&config)?;

    let mut classifier = match OnnxActionClassifier::new(
        &config.model.action_path,
        config.model.action_labels.clone(),
        config.model.crop_size,
    ) {
        Ok(classifier) => Some(classifier),
        Err(e) => {
            warn!("Action classifier unavailable, running segment detection only: {e}");
            None
        }
    };

    let output = pipeline::run(
        &mut source,
        &mut detector,
        classifier.as_mut().map(|c| c as &mut dyn ActionClassifier),
        &config,
        &mut progress,
    )?;
    let mut events = output.events;

    if args.export_clips && !events.is_empty() {
        let exporter = ClipExporter::new(
            args.video.clone(),
            PathBuf::from(&config.output.dir),
            config.output.clip_padding,
        );
        exporter.export_all(&mut events);
    }

    let job_id = format!("job_{}", Utc::now().timestamp());
    Ok(AnalysisResult::completed(events, job_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::try_parse_from(["play-detection", "--video", "match.mp4"]).unwrap();
        assert_eq!(args.video, PathBuf::from("match.mp4"));
        assert!(args.progress_file.is_none());
        assert!(!args.export_clips);
        assert_eq!(args.config, "config.yaml");
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn test_args_require_video() {
        assert!(Args::try_parse_from(["play-detection"]).is_err());
    }

    #[test]
    fn test_missing_video_fails_in_band() {
        let args =
            Args::try_parse_from(["play-detection", "--video", "no/such/game.mp4"]).unwrap();
        let err = analyze(&args).unwrap_err();
        let result = AnalysisResult::failure(format!("{err:#}"));

        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
        assert!(result.events.is_none());
    }

    #[test]
    fn test_args_parse_full() {
        let args = Args::try_parse_from([
            "play-detection",
            "--video",
            "game.mp4",
            "--progress-file",
            "/tmp/progress.json",
            "--export-clips",
            "--config",
            "custom.yaml",
            "--output-dir",
            "clips",
        ])
        .unwrap();
        assert!(args.export_clips);
        assert_eq!(args.progress_file, Some(PathBuf::from("/tmp/progress.json")));
        assert_eq!(args.output_dir, Some(PathBuf::from("clips")));
        assert_eq!(args.config, "custom.yaml");
    }
}
