//! Common utility functions shared across CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rostro_core::Individual;
use serde::Serialize;

/// Resolve an input path, falling back to `analyze_dir` for relative names
/// that do not exist in the working directory.
pub fn resolve_input(path: &Path, analyze_dir: &Path) -> PathBuf {
    if path.exists() || path.is_absolute() {
        return path.to_path_buf();
    }
    let staged = analyze_dir.join(path);
    if staged.exists() {
        staged
    } else {
        path.to_path_buf()
    }
}

/// Format a timestamp as a human-readable UTC string.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Given name followed by any non-empty surnames.
pub fn full_name(individual: &Individual) -> String {
    [
        individual.given_name.as_str(),
        individual.first_surname.as_str(),
        individual.second_surname.as_str(),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(" ")
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
