use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Error, Debug)]
pub enum RostroError {
    #[error("Image read error: {0}")]
    ImageRead(String),

    #[error("Image write error: {0}")]
    ImageWrite(String),

    #[error("Reference image must contain exactly one face, found {found}")]
    FaceCount { found: usize },

    #[error("Reference index not initialized")]
    IndexNotReady,

    #[error("Embedding dimension mismatch: index={expected}, query={actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Video decode error: {0}")]
    VideoDecode(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RostroError>;
