//! Index rebuild.

use anyhow::{Context, Result};
use colored::Colorize;

use super::AppContext;
use crate::utils::print_json;
use crate::OutputFormat;

pub fn execute(
    ctx: &AppContext,
    from_directory: bool,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let report = if from_directory {
        ctx.registry
            .rebuild_from_directory()
            .with_context(|| format!("Failed to scan {}", ctx.config.reference_dir.display()))?
    } else {
        ctx.registry
            .rebuild_index()
            .context("Failed to rebuild index from catalog")?
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text if !quiet => {
            println!(
                "{} {} references loaded",
                "Rebuilt".green().bold(),
                report.loaded
            );
            for skipped in &report.skipped {
                let subject = skipped
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .or_else(|| skipped.face_id.clone())
                    .unwrap_or_default();
                println!("   {} {} {}", "skipped".yellow(), subject, skipped.reason.dimmed());
            }
        }
        OutputFormat::Text => {}
    }
    Ok(())
}
