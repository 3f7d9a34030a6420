//! Individual management commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use rostro_core::{Catalog, Face, Individual, NewIndividual, RostroError};
use serde::Serialize;
use tracing::info;

use super::AppContext;
use crate::utils::{format_timestamp, full_name, print_json, resolve_input};
use crate::OutputFormat;

#[derive(Serialize)]
struct IndividualView<'a> {
    #[serde(flatten)]
    individual: &'a Individual,
    display_name: String,
}

#[derive(Serialize)]
struct IndividualDetail<'a> {
    #[serde(flatten)]
    individual: IndividualView<'a>,
    references: &'a [Face],
}

fn view(individual: &Individual) -> IndividualView<'_> {
    IndividualView {
        individual,
        display_name: individual.display_name(),
    }
}

pub fn create(
    ctx: &AppContext,
    given_name: String,
    first_surname: String,
    second_surname: String,
    reference: Option<PathBuf>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let bytes = match &reference {
        Some(path) => {
            let path = resolve_input(path, &ctx.config.analyze_dir);
            let bytes = std::fs::read(&path)
                .map_err(|e| RostroError::ImageRead(format!("{}: {e}", path.display())))?;
            Some(bytes)
        }
        None => None,
    };

    let new = NewIndividual::new(given_name).with_surnames(first_surname, second_surname);
    let (individual, face) = ctx
        .registry
        .create_individual(new, bytes.as_deref())
        .context("Failed to create individual")?;

    info!(individual_id = %individual.id, with_reference = face.is_some(), "Created individual");

    match format {
        OutputFormat::Json => print_json(&view(&individual))?,
        OutputFormat::Text if !quiet => {
            println!("{} {}", "Created".green().bold(), full_name(&individual));
            println!("   {} {}", "ID:".dimmed(), individual.id);
            if let Some(face) = face {
                println!("   {} {}", "Reference:".dimmed(), face.path.display());
            }
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

pub fn list(ctx: &AppContext, format: OutputFormat, quiet: bool) -> Result<()> {
    let individuals = ctx
        .catalog
        .list_individuals()
        .context("Failed to list individuals")?;

    match format {
        OutputFormat::Json => {
            let views: Vec<_> = individuals.iter().map(view).collect();
            print_json(&views)?;
        }
        OutputFormat::Text if !quiet => {
            if individuals.is_empty() {
                println!("{}", "No individuals registered".dimmed());
            }
            for individual in &individuals {
                println!(
                    "{}  {:<32} {} {}",
                    individual.id.dimmed(),
                    full_name(individual),
                    individual.faces.len(),
                    if individual.faces.len() == 1 { "face" } else { "faces" }
                );
            }
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

pub fn show(ctx: &AppContext, id: &str, format: OutputFormat, quiet: bool) -> Result<()> {
    let individual = ctx
        .catalog
        .get_individual(id)
        .with_context(|| format!("Failed to load individual {id}"))?;
    let faces = ctx
        .catalog
        .list_faces_of(id)
        .with_context(|| format!("Failed to list faces of {id}"))?;

    match format {
        OutputFormat::Json => print_json(&IndividualDetail {
            individual: view(&individual),
            references: &faces,
        })?,
        OutputFormat::Text if !quiet => {
            println!("{}", full_name(&individual).bold());
            println!("   {} {}", "ID:".dimmed(), individual.id);
            println!("   {} {}", "Label:".dimmed(), individual.display_name());
            println!(
                "   {} {}",
                "Created:".dimmed(),
                format_timestamp(&individual.created_at)
            );
            println!("   {} {}", "Faces:".dimmed(), faces.len());
            for face in &faces {
                println!("     {} {}", face.id.dimmed(), face.path.display());
            }
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

pub fn update(
    ctx: &AppContext,
    id: &str,
    given_name: String,
    first_surname: String,
    second_surname: String,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let update = NewIndividual::new(given_name).with_surnames(first_surname, second_surname);
    let individual = ctx
        .registry
        .update_individual(id, update)
        .with_context(|| format!("Failed to update individual {id}"))?;

    match format {
        OutputFormat::Json => print_json(&view(&individual))?,
        OutputFormat::Text if !quiet => {
            println!("{} {}", "Updated".green().bold(), full_name(&individual));
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

pub fn delete(ctx: &AppContext, id: &str, format: OutputFormat, quiet: bool) -> Result<()> {
    let removed = ctx
        .registry
        .delete_individual(id)
        .with_context(|| format!("Failed to delete individual {id}"))?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "deleted": id,
            "faces_removed": removed,
        }))?,
        OutputFormat::Text if !quiet => {
            println!(
                "{} {} ({} faces removed)",
                "Deleted".green().bold(),
                id,
                removed
            );
        }
        OutputFormat::Text => {}
    }
    Ok(())
}
