//! Exit codes following sysexits.h conventions.
//!
//! Failures are classified from the typed error at the root of the chain,
//! so scripts can tell a rejected reference from a missing file.

use rostro_core::{CatalogError, RostroError};

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Invalid arguments or configuration.
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Reference image rejected (zero or several faces).
/// Maps to EX_DATAERR from sysexits.h.
pub const REFERENCE_REJECTED: i32 = 65;

/// Input file or catalog record not found.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Inference service unavailable.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const SERVICE_UNAVAILABLE: i32 = 69;

/// Cannot write output or catalog.
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = err
            .chain()
            .find_map(|cause| {
                cause
                    .downcast_ref::<RostroError>()
                    .map(classify)
                    .or_else(|| cause.downcast_ref::<CatalogError>().map(classify_catalog))
            })
            .unwrap_or(GENERAL_ERROR);

        Self {
            code,
            message: Some(format!("{err:#}")),
        }
    }
}

fn classify(err: &RostroError) -> i32 {
    match err {
        RostroError::FaceCount { .. } => REFERENCE_REJECTED,
        RostroError::ImageRead(_) | RostroError::VideoDecode(_) => INPUT_ERROR,
        RostroError::Provider(_) => SERVICE_UNAVAILABLE,
        RostroError::InvalidConfig(_) => USAGE_ERROR,
        RostroError::ImageWrite(_) | RostroError::Io(_) => IO_ERROR,
        RostroError::Catalog(inner) => classify_catalog(inner),
        RostroError::IndexNotReady | RostroError::DimensionMismatch { .. } => GENERAL_ERROR,
    }
}

fn classify_catalog(err: &CatalogError) -> i32 {
    match err {
        CatalogError::IndividualNotFound(_) | CatalogError::FaceNotFound(_) => INPUT_ERROR,
        CatalogError::InvalidInput(_) => USAGE_ERROR,
        CatalogError::FaceAlreadyOwned { .. } => GENERAL_ERROR,
        CatalogError::Storage(_) | CatalogError::Serialization(_) => IO_ERROR,
    }
}
