//! Identity catalog: the durable store of Individuals and their reference Faces.
//!
//! The core does not own persistence. It depends on the [`Catalog`] trait and
//! on the contract documented there; [`LocalCatalog`] is the backend shipped
//! with the crate (in-memory, optionally snapshotted to a JSON file).

mod local;
pub mod naming;

pub use local::LocalCatalog;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog-assigned identifier of an Individual.
pub type IndividualId = String;

/// Catalog-assigned identifier of a Face.
pub type FaceId = String;

/// Errors returned by a [`Catalog`] backend.
///
/// `*NotFound` is a normal outcome and is kept apart from storage failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Individual not found: {0}")]
    IndividualNotFound(IndividualId),

    #[error("Face not found: {0}")]
    FaceNotFound(FaceId),

    #[error("Face {face_id} already belongs to individual {owner}")]
    FaceAlreadyOwned { face_id: FaceId, owner: IndividualId },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::IndividualNotFound(_) | Self::FaceNotFound(_))
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// A named identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub id: IndividualId,
    pub given_name: String,
    pub first_surname: String,
    pub second_surname: String,
    /// Owned faces; never contains duplicates
    #[serde(default)]
    pub faces: Vec<FaceId>,
    pub created_at: DateTime<Utc>,
}

impl Individual {
    /// Label used when annotating detections: `<given>_<first surname>`.
    pub fn display_name(&self) -> String {
        if self.first_surname.is_empty() {
            self.given_name.clone()
        } else {
            format!("{}_{}", self.given_name, self.first_surname)
        }
    }

    pub fn owns_face(&self, face_id: &str) -> bool {
        self.faces.iter().any(|f| f == face_id)
    }
}

/// Input for creating or renaming an Individual.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewIndividual {
    pub given_name: String,
    #[serde(default)]
    pub first_surname: String,
    #[serde(default)]
    pub second_surname: String,
}

impl NewIndividual {
    pub fn new(given_name: impl Into<String>) -> Self {
        Self {
            given_name: given_name.into(),
            ..Default::default()
        }
    }

    pub fn with_surnames(
        mut self,
        first_surname: impl Into<String>,
        second_surname: impl Into<String>,
    ) -> Self {
        self.first_surname = first_surname.into();
        self.second_surname = second_surname.into();
        self
    }

    /// A given name is mandatory.
    pub fn validate(&self) -> CatalogResult<()> {
        if self.given_name.trim().is_empty() {
            return Err(CatalogError::InvalidInput("given name is required".into()));
        }
        Ok(())
    }
}

/// A stored reference sample.
///
/// The embedding is not persisted; it is recomputed from `path` on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: FaceId,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Storage contract consumed by the identity core.
///
/// Backends must guarantee:
///
/// - Ids are assigned on creation and never reused.
/// - `attach_face` is add-to-set: attaching an already attached face is a no-op.
/// - A face belongs to at most one Individual at a time.
/// - Lookups of missing records return a `*NotFound` error, never a storage error.
pub trait Catalog: Send + Sync {
    fn create_individual(&self, new: NewIndividual) -> CatalogResult<Individual>;

    fn get_individual(&self, id: &str) -> CatalogResult<Individual>;

    /// All Individuals, oldest first.
    fn list_individuals(&self) -> CatalogResult<Vec<Individual>>;

    /// Replace name fields. Faces are untouched.
    fn update_individual(&self, id: &str, update: NewIndividual) -> CatalogResult<Individual>;

    /// Remove the Individual record only. Cascading is the caller's job.
    fn delete_individual(&self, id: &str) -> CatalogResult<()>;

    fn create_face(&self, path: PathBuf) -> CatalogResult<Face>;

    fn get_face(&self, id: &str) -> CatalogResult<Face>;

    fn delete_face(&self, id: &str) -> CatalogResult<()>;

    fn attach_face(&self, individual_id: &str, face_id: &str) -> CatalogResult<Individual>;

    fn detach_face(&self, individual_id: &str, face_id: &str) -> CatalogResult<Individual>;

    /// Faces owned by an Individual. Dangling face ids are skipped.
    fn list_faces_of(&self, individual_id: &str) -> CatalogResult<Vec<Face>>;

    fn find_owner_of_face(&self, face_id: &str) -> CatalogResult<Individual>;
}
