//! Reference face commands.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use super::AppContext;
use crate::utils::{print_json, resolve_input};
use crate::OutputFormat;

pub fn enroll(
    ctx: &AppContext,
    id: &str,
    image: &Path,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let path = resolve_input(image, &ctx.config.analyze_dir);
    let face = ctx
        .registry
        .enroll_face_from_path(id, &path)
        .with_context(|| format!("Failed to enroll {} for {id}", path.display()))?;

    match format {
        OutputFormat::Json => print_json(&face)?,
        OutputFormat::Text if !quiet => {
            println!("{} {}", "Enrolled face".green().bold(), face.id);
            println!("   {} {}", "Stored at:".dimmed(), face.path.display());
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

pub fn remove(
    ctx: &AppContext,
    id: &str,
    face_id: &str,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    ctx.registry
        .remove_face(id, face_id)
        .with_context(|| format!("Failed to remove face {face_id} from {id}"))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "individual_id": id,
            "removed_face": face_id,
        }))?,
        OutputFormat::Text if !quiet => {
            println!("{} {}", "Removed face".green().bold(), face_id);
        }
        OutputFormat::Text => {}
    }
    Ok(())
}
