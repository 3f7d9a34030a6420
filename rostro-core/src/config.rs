//! Recognition configuration.
//!
//! Loaded from environment variables with sensible defaults, then validated
//! once before any pipeline is constructed.

use std::path::PathBuf;

use crate::error::{Result, RostroError};

/// Default maximum Euclidean distance for a face to count as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Default video sampling stride.
pub const DEFAULT_FRAME_SKIP: usize = 5;

/// Default per-frame downscale ratio applied before detection.
pub const DEFAULT_DOWNSCALE: f32 = 0.6;

/// Configuration shared by the registry and the frame pipelines.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionConfig {
    /// Accept a match when the nearest distance is strictly below this (default: 0.6)
    pub match_threshold: f32,
    /// Only every Nth video frame is passed to detection (default: 5)
    pub frame_skip: usize,
    /// Uniform scale factor for sampled video frames, in (0, 1] (default: 0.6)
    pub downscale: f32,
    /// Directory holding reference face images
    pub reference_dir: PathBuf,
    /// Directory receiving annotated output images
    pub detected_dir: PathBuf,
    /// Directory receiving uploaded media awaiting analysis
    pub analyze_dir: PathBuf,
    /// JSON snapshot of the local catalog
    pub catalog_path: PathBuf,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            frame_skip: DEFAULT_FRAME_SKIP,
            downscale: DEFAULT_DOWNSCALE,
            reference_dir: PathBuf::from("imagenes/referencia"),
            detected_dir: PathBuf::from("imagenes/detectadas"),
            analyze_dir: PathBuf::from("imagenes/analizar"),
            catalog_path: PathBuf::from("catalog.json"),
        }
    }
}

impl RecognitionConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let match_threshold = std::env::var("ROSTRO_MATCH_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.match_threshold);

        let frame_skip = std::env::var("ROSTRO_FRAME_SKIP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.frame_skip);

        let downscale = std::env::var("ROSTRO_DOWNSCALE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.downscale);

        let path_var = |name: &str, fallback: PathBuf| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(fallback)
        };

        Self {
            match_threshold,
            frame_skip,
            downscale,
            reference_dir: path_var("ROSTRO_REFERENCE_DIR", defaults.reference_dir),
            detected_dir: path_var("ROSTRO_DETECTED_DIR", defaults.detected_dir),
            analyze_dir: path_var("ROSTRO_ANALYZE_DIR", defaults.analyze_dir),
            catalog_path: path_var("ROSTRO_CATALOG_PATH", defaults.catalog_path),
        }
    }

    /// Re-root every directory under `data_dir`, keeping the default layout.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        let root = data_dir.into();
        self.reference_dir = root.join("imagenes/referencia");
        self.detected_dir = root.join("imagenes/detectadas");
        self.analyze_dir = root.join("imagenes/analizar");
        self.catalog_path = root.join("catalog.json");
        self
    }

    /// Check value ranges. Called once at the boundary.
    pub fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(RostroError::InvalidConfig(format!(
                "match_threshold must be a positive number, got {}",
                self.match_threshold
            )));
        }
        if self.frame_skip == 0 {
            return Err(RostroError::InvalidConfig(
                "frame_skip must be at least 1".into(),
            ));
        }
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            return Err(RostroError::InvalidConfig(format!(
                "downscale must be in (0, 1], got {}",
                self.downscale
            )));
        }
        Ok(())
    }
}
