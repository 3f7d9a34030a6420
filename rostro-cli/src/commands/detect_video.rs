//! Video detection.
//!
//! The pipeline runs on a blocking worker while the runtime watches for
//! Ctrl-C. An interrupt stops the run at the next sampled frame and the
//! partial aggregate is still reported.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use image::RgbImage;
use rostro_core::{
    CancelFlag, FramePreview, ImageDetection, ImageSequenceSource, PreviewControl,
    VideoDetection, VideoOptions, VideoPipeline,
};
use serde::Serialize;
use tracing::{info, warn};

use super::AppContext;
use crate::utils::{print_json, resolve_input};
use crate::OutputFormat;

#[derive(Serialize)]
struct SightingReport {
    individual_id: String,
    name: String,
    frame_index: usize,
    frame_path: PathBuf,
}

#[derive(Serialize)]
struct VideoReport {
    input: PathBuf,
    individuals: Vec<SightingReport>,
    objects: Vec<String>,
    frames_read: usize,
    frames_sampled: usize,
    cancelled: bool,
}

/// Prints one line per sampled frame on stderr.
struct ConsolePreview;

impl FramePreview for ConsolePreview {
    fn show(
        &mut self,
        frame_index: usize,
        frame: &RgbImage,
        detection: &ImageDetection,
    ) -> PreviewControl {
        eprintln!(
            "{} {:>6}  {}x{}  faces {}  known {}  objects {}",
            "frame".dimmed(),
            frame_index,
            frame.width(),
            frame.height(),
            detection.faces.len(),
            detection.known_individuals().len(),
            detection.objects.len()
        );
        PreviewControl::Continue
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    ctx: AppContext,
    input: PathBuf,
    frame_skip: Option<usize>,
    downscale: Option<f32>,
    live: bool,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let input = resolve_input(&input, &ctx.config.analyze_dir);

    let mut options = VideoOptions::from_config(&ctx.config).with_live(live);
    if let Some(frame_skip) = frame_skip {
        options.frame_skip = frame_skip;
    }
    if let Some(downscale) = downscale {
        options.downscale = downscale;
    }

    let cancel = CancelFlag::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping at the next sampled frame");
                cancel.cancel();
            }
        })
    };

    let worker_input = input.clone();
    let worker_cancel = cancel.clone();
    let (ctx, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = analyze(&ctx, options, &worker_input, &worker_cancel);
        (ctx, outcome)
    })
    .await
    .context("Video worker terminated unexpectedly")?;
    watcher.abort();

    let detection =
        outcome.with_context(|| format!("Failed to analyze video {}", input.display()))?;

    info!(
        individuals = detection.per_individual_first_frame.len(),
        labels = detection.distinct_object_labels.len(),
        cancelled = detection.cancelled,
        "Video analyzed"
    );

    let report = build_report(&ctx, input, detection)?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text if !quiet => print_text(&report),
        OutputFormat::Text => {}
    }
    Ok(())
}

/// Runs on the blocking worker: index load, provider calls and decoding all block.
fn analyze(
    ctx: &AppContext,
    options: VideoOptions,
    input: &Path,
    cancel: &CancelFlag,
) -> Result<VideoDetection> {
    ctx.load_index()?;
    let pipeline =
        VideoPipeline::new(ctx.frame_pipeline(), options).context("Invalid video options")?;
    Ok(run_pipeline(&pipeline, input, cancel)?)
}

/// Opens the source on the worker thread, so decoder handles never cross threads.
fn run_pipeline(
    pipeline: &VideoPipeline,
    input: &Path,
    cancel: &CancelFlag,
) -> rostro_core::Result<VideoDetection> {
    let mut preview = ConsolePreview;
    let preview = Some(&mut preview as &mut dyn FramePreview);

    if input.is_dir() {
        return pipeline.run(ImageSequenceSource::open(input)?, cancel, preview);
    }
    run_video_file(pipeline, input, cancel, preview)
}

#[cfg(feature = "ffmpeg")]
fn run_video_file(
    pipeline: &VideoPipeline,
    input: &Path,
    cancel: &CancelFlag,
    preview: Option<&mut dyn FramePreview>,
) -> rostro_core::Result<VideoDetection> {
    let source = rostro_core::FfmpegFrameSource::open(input)?;
    pipeline.run(source, cancel, preview)
}

#[cfg(not(feature = "ffmpeg"))]
fn run_video_file(
    _pipeline: &VideoPipeline,
    input: &Path,
    _cancel: &CancelFlag,
    _preview: Option<&mut dyn FramePreview>,
) -> rostro_core::Result<VideoDetection> {
    Err(rostro_core::RostroError::VideoDecode(format!(
        "{}: not a frame directory, and this build has no FFmpeg support",
        input.display()
    )))
}

fn build_report(
    ctx: &AppContext,
    input: PathBuf,
    detection: VideoDetection,
) -> Result<VideoReport> {
    let individuals = detection
        .per_individual_first_frame
        .into_iter()
        .map(|sighting| -> Result<SightingReport> {
            Ok(SightingReport {
                name: ctx.registry.display_name(Some(&sighting.individual_id))?,
                individual_id: sighting.individual_id,
                frame_index: sighting.frame_index,
                frame_path: sighting.frame_path,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(VideoReport {
        input,
        individuals,
        objects: detection.distinct_object_labels,
        frames_read: detection.frames_read,
        frames_sampled: detection.frames_sampled,
        cancelled: detection.cancelled,
    })
}

fn print_text(report: &VideoReport) {
    println!(
        "{} {} ({} frames read, {} sampled)",
        "Analyzed".green().bold(),
        report.input.display(),
        report.frames_read,
        report.frames_sampled
    );
    if report.cancelled {
        println!("   {}", "Interrupted, results are partial".yellow());
    }

    if report.individuals.is_empty() {
        println!("   {}", "No known individuals".dimmed());
    }
    for sighting in &report.individuals {
        println!(
            "   {} {} {} {}",
            sighting.name.green(),
            format!("frame {}", sighting.frame_index).dimmed(),
            "->".dimmed(),
            sighting.frame_path.display()
        );
    }

    if !report.objects.is_empty() {
        println!("   {} {}", "Objects:".dimmed(), report.objects.join(", "));
    }
}
