//! Single image detection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use rostro_core::annotate::save_annotated;
use rostro_core::{FaceBox, ImageDetection, ObjectDetection};
use serde::Serialize;
use tracing::info;

use super::AppContext;
use crate::utils::{print_json, resolve_input};
use crate::OutputFormat;

#[derive(Serialize)]
struct FaceReport {
    name: String,
    individual_id: Option<String>,
    distance: Option<f32>,
    bbox: FaceBox,
}

#[derive(Serialize)]
struct ImageReport {
    input: PathBuf,
    faces: Vec<FaceReport>,
    objects: Vec<ObjectDetection>,
    annotated: Option<PathBuf>,
}

fn build_report(
    ctx: &AppContext,
    input: PathBuf,
    detection: &ImageDetection,
    annotated: Option<PathBuf>,
) -> Result<ImageReport> {
    let faces = detection
        .faces
        .iter()
        .map(|face| -> Result<FaceReport> {
            Ok(FaceReport {
                name: ctx.registry.display_name(face.individual_id())?,
                individual_id: face.individual_id().map(str::to_string),
                distance: face.identity.as_ref().map(|i| i.distance),
                bbox: face.bbox,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ImageReport {
        input,
        faces,
        objects: detection.objects.clone(),
        annotated,
    })
}

pub fn execute(
    ctx: &AppContext,
    image: &Path,
    save: bool,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    ctx.load_index()?;
    let path = resolve_input(image, &ctx.config.analyze_dir);

    let (frame, detection) = ctx
        .frame_pipeline()
        .process_path(&path)
        .with_context(|| format!("Failed to analyze {}", path.display()))?;

    let annotated = if save {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Input path has no file name")?;
        Some(
            save_annotated(&frame, &detection, &ctx.config.detected_dir, file_name)
                .context("Failed to save annotated image")?,
        )
    } else {
        None
    };

    info!(
        faces = detection.faces.len(),
        known = detection.known_individuals().len(),
        objects = detection.objects.len(),
        "Image analyzed"
    );

    let report = build_report(ctx, path, &detection, annotated)?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text if !quiet => print_text(&report),
        OutputFormat::Text => {}
    }
    Ok(())
}

fn print_text(report: &ImageReport) {
    println!("{} {}", "Analyzed".green().bold(), report.input.display());

    if report.faces.is_empty() {
        println!("   {}", "No faces detected".dimmed());
    }
    for face in &report.faces {
        let name = if face.individual_id.is_some() {
            face.name.green()
        } else {
            face.name.yellow()
        };
        match face.distance {
            Some(distance) => println!("   {} {} {:.3}", name, "distance".dimmed(), distance),
            None => println!("   {name}"),
        }
    }

    if !report.objects.is_empty() {
        let labels: Vec<&str> = report.objects.iter().map(|o| o.label.as_str()).collect();
        println!("   {} {}", "Objects:".dimmed(), labels.join(", "));
    }
    if let Some(path) = &report.annotated {
        println!("   {} {}", "Saved:".dimmed(), path.display());
    }
}
