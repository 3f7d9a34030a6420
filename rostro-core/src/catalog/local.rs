//! Local catalog backend: concurrent in-memory maps with an optional JSON snapshot.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Catalog, CatalogError, CatalogResult, Face, Individual, NewIndividual};

/// On-disk layout of the snapshot file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    individuals: Vec<Individual>,
    #[serde(default)]
    faces: Vec<Face>,
}

/// [`Catalog`] backed by two `DashMap`s.
///
/// Reads are lock-free with respect to each other. Mutations are serialized
/// through `write_lock` so the ownership checks in `attach_face` and the
/// snapshot written after each mutation see a consistent state. A mutation
/// whose snapshot fails is reverted in memory before the error returns.
#[derive(Default)]
pub struct LocalCatalog {
    individuals: DashMap<String, Individual>,
    faces: DashMap<String, Face>,
    /// Snapshot destination; `None` keeps everything in memory
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl LocalCatalog {
    /// Catalog that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or start) a catalog persisted at `path`.
    ///
    /// A missing file yields an empty catalog; the file is created on the
    /// first mutation.
    pub fn open(path: impl Into<PathBuf>) -> CatalogResult<Self> {
        let path = path.into();
        let document = if path.exists() {
            let bytes = fs::read(&path)?;
            serde_json::from_slice::<CatalogDocument>(&bytes)?
        } else {
            CatalogDocument::default()
        };

        let catalog = Self {
            path: Some(path),
            ..Default::default()
        };
        for individual in document.individuals {
            catalog.individuals.insert(individual.id.clone(), individual);
        }
        for face in document.faces {
            catalog.faces.insert(face.id.clone(), face);
        }

        info!(
            path = ?catalog.path,
            individuals = catalog.individuals.len(),
            faces = catalog.faces.len(),
            "Catalog opened"
        );
        Ok(catalog)
    }

    /// Snapshot path, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn individual_count(&self) -> usize {
        self.individuals.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Write the snapshot atomically (temp file + rename). Caller holds `write_lock`.
    fn persist(&self) -> CatalogResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut individuals: Vec<Individual> =
            self.individuals.iter().map(|e| e.value().clone()).collect();
        individuals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut faces: Vec<Face> = self.faces.iter().map(|e| e.value().clone()).collect();
        faces.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let bytes = serde_json::to_vec_pretty(&CatalogDocument { individuals, faces })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;

        debug!(path = %path.display(), "Catalog snapshot written");
        Ok(())
    }

    /// Persist, or run `undo` so memory matches the last snapshot written.
    fn persist_or_undo(&self, undo: impl FnOnce()) -> CatalogResult<()> {
        self.persist().inspect_err(|e| {
            warn!(error = %e, "Catalog snapshot failed, change reverted");
            undo();
        })
    }

    fn owner_of(&self, face_id: &str) -> Option<String> {
        self.individuals
            .iter()
            .find(|e| e.value().owns_face(face_id))
            .map(|e| e.key().clone())
    }
}

impl std::fmt::Debug for LocalCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCatalog")
            .field("individuals", &self.individuals.len())
            .field("faces", &self.faces.len())
            .field("path", &self.path)
            .finish()
    }
}

impl Catalog for LocalCatalog {
    fn create_individual(&self, new: NewIndividual) -> CatalogResult<Individual> {
        new.validate()?;
        let _guard = self.lock();

        let individual = Individual {
            id: Self::new_id(),
            given_name: new.given_name.trim().to_string(),
            first_surname: new.first_surname.trim().to_string(),
            second_surname: new.second_surname.trim().to_string(),
            faces: Vec::new(),
            created_at: Utc::now(),
        };
        self.individuals
            .insert(individual.id.clone(), individual.clone());
        self.persist_or_undo(|| {
            self.individuals.remove(&individual.id);
        })?;
        Ok(individual)
    }

    fn get_individual(&self, id: &str) -> CatalogResult<Individual> {
        self.individuals
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CatalogError::IndividualNotFound(id.to_string()))
    }

    fn list_individuals(&self) -> CatalogResult<Vec<Individual>> {
        let mut all: Vec<Individual> = self.individuals.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    fn update_individual(&self, id: &str, update: NewIndividual) -> CatalogResult<Individual> {
        update.validate()?;
        let _guard = self.lock();

        let (updated, previous) = {
            let mut entry = self
                .individuals
                .get_mut(id)
                .ok_or_else(|| CatalogError::IndividualNotFound(id.to_string()))?;
            let previous = entry.clone();
            entry.given_name = update.given_name.trim().to_string();
            entry.first_surname = update.first_surname.trim().to_string();
            entry.second_surname = update.second_surname.trim().to_string();
            (entry.clone(), previous)
        };
        self.persist_or_undo(|| {
            self.individuals.insert(previous.id.clone(), previous);
        })?;
        Ok(updated)
    }

    fn delete_individual(&self, id: &str) -> CatalogResult<()> {
        let _guard = self.lock();
        let (key, removed) = self
            .individuals
            .remove(id)
            .ok_or_else(|| CatalogError::IndividualNotFound(id.to_string()))?;
        self.persist_or_undo(|| {
            self.individuals.insert(key, removed);
        })
    }

    fn create_face(&self, path: PathBuf) -> CatalogResult<Face> {
        let _guard = self.lock();
        let face = Face {
            id: Self::new_id(),
            path,
            created_at: Utc::now(),
        };
        self.faces.insert(face.id.clone(), face.clone());
        self.persist_or_undo(|| {
            self.faces.remove(&face.id);
        })?;
        Ok(face)
    }

    fn get_face(&self, id: &str) -> CatalogResult<Face> {
        self.faces
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CatalogError::FaceNotFound(id.to_string()))
    }

    fn delete_face(&self, id: &str) -> CatalogResult<()> {
        let _guard = self.lock();
        let (key, removed) = self
            .faces
            .remove(id)
            .ok_or_else(|| CatalogError::FaceNotFound(id.to_string()))?;
        self.persist_or_undo(|| {
            self.faces.insert(key, removed);
        })
    }

    fn attach_face(&self, individual_id: &str, face_id: &str) -> CatalogResult<Individual> {
        let _guard = self.lock();

        if !self.faces.contains_key(face_id) {
            return Err(CatalogError::FaceNotFound(face_id.to_string()));
        }
        if let Some(owner) = self.owner_of(face_id) {
            if owner != individual_id {
                return Err(CatalogError::FaceAlreadyOwned {
                    face_id: face_id.to_string(),
                    owner,
                });
            }
        }

        let (updated, changed) = {
            let mut entry = self
                .individuals
                .get_mut(individual_id)
                .ok_or_else(|| CatalogError::IndividualNotFound(individual_id.to_string()))?;
            let changed = !entry.owns_face(face_id);
            if changed {
                entry.faces.push(face_id.to_string());
            }
            (entry.clone(), changed)
        };
        if changed {
            self.persist_or_undo(|| {
                if let Some(mut entry) = self.individuals.get_mut(individual_id) {
                    entry.faces.retain(|f| f != face_id);
                }
            })?;
        }
        Ok(updated)
    }

    fn detach_face(&self, individual_id: &str, face_id: &str) -> CatalogResult<Individual> {
        let _guard = self.lock();

        let (updated, previous) = {
            let mut entry = self
                .individuals
                .get_mut(individual_id)
                .ok_or_else(|| CatalogError::IndividualNotFound(individual_id.to_string()))?;
            let previous = entry.faces.clone();
            entry.faces.retain(|f| f != face_id);
            let changed = entry.faces.len() != previous.len();
            (entry.clone(), changed.then_some(previous))
        };
        if let Some(previous) = previous {
            self.persist_or_undo(|| {
                if let Some(mut entry) = self.individuals.get_mut(individual_id) {
                    entry.faces = previous;
                }
            })?;
        }
        Ok(updated)
    }

    fn list_faces_of(&self, individual_id: &str) -> CatalogResult<Vec<Face>> {
        let individual = self.get_individual(individual_id)?;
        Ok(individual
            .faces
            .iter()
            .filter_map(|id| self.faces.get(id).map(|e| e.value().clone()))
            .collect())
    }

    fn find_owner_of_face(&self, face_id: &str) -> CatalogResult<Individual> {
        self.individuals
            .iter()
            .find(|e| e.value().owns_face(face_id))
            .map(|e| e.value().clone())
            .ok_or_else(|| CatalogError::FaceNotFound(face_id.to_string()))
    }
}
