//! Catalog consistency layer.
//!
//! [`FaceRegistry`] is the only component that mutates the catalog, the
//! reference directory and the [`ReferenceIndex`] together. It keeps them in
//! step:
//!
//! - **Rebuild**: every face owned by an individual is re-embedded from its
//!   image. Unreadable files and images without exactly one face are skipped
//!   with a warning, never fatal.
//! - **Enrolment**: the individual must exist before its face is written.
//!   A rejected image leaves no file and no face record behind.
//! - **Removal**: index entries, attachments, face records and files go
//!   before the individual record itself.
//!
//! Mutations are serialized; detection only reads the index and never waits
//! on them.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::catalog::naming::{is_reference_image, owner_from_file_name, owner_prefix, reference_file_name};
use crate::catalog::{Catalog, CatalogError, Face, FaceId, Individual, IndividualId, NewIndividual};
use crate::error::{Result, RostroError};
use crate::imaging::{decode_image, read_image};
use crate::index::{FaceLabel, IndexEntry, ReferenceIndex};
use crate::provider::EmbeddingProvider;

/// Label shown for faces that match no individual.
pub const UNKNOWN_LABEL: &str = "Desconocido";

/// A reference left out of the index during a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedReference {
    pub face_id: Option<FaceId>,
    pub individual_id: Option<IndividualId>,
    pub path: Option<PathBuf>,
    pub reason: String,
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildReport {
    /// References now in the index
    pub loaded: usize,
    pub skipped: Vec<SkippedReference>,
}

impl RebuildReport {
    fn skip(&mut self, skipped: SkippedReference) {
        warn!(
            face_id = skipped.face_id.as_deref().unwrap_or("-"),
            individual_id = skipped.individual_id.as_deref().unwrap_or("-"),
            path = ?skipped.path,
            reason = %skipped.reason,
            "Skipping reference"
        );
        self.skipped.push(skipped);
    }
}

pub struct FaceRegistry {
    catalog: Arc<dyn Catalog>,
    index: Arc<ReferenceIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    reference_dir: PathBuf,
    mutations: Mutex<()>,
}

impl FaceRegistry {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        index: Arc<ReferenceIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        reference_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            index,
            embedder,
            reference_dir: reference_dir.into(),
            mutations: Mutex::new(()),
        }
    }

    // Poisoning is ignored: the guarded state lives in the catalog and index
    fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn index(&self) -> &Arc<ReferenceIndex> {
        &self.index
    }

    pub fn reference_dir(&self) -> &Path {
        &self.reference_dir
    }

    /// Embedding of the single face in the image at `path`.
    pub fn reference_embedding(&self, path: &Path) -> Result<Vec<f32>> {
        let image = read_image(path)?;
        self.single_face(&image)
    }

    fn single_face(&self, image: &image::RgbImage) -> Result<Vec<f32>> {
        let mut faces = self.embedder.detect(image)?;
        if faces.len() != 1 {
            return Err(RostroError::FaceCount { found: faces.len() });
        }
        Ok(faces.remove(0).embedding)
    }

    /// Replace the index with every face owned by an individual in the catalog.
    #[instrument(level = "info", skip(self))]
    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        let _guard = self.lock_mutations();
        let mut report = RebuildReport::default();
        let mut entries = Vec::new();

        for individual in self.catalog.list_individuals()? {
            for face_id in &individual.faces {
                let face = match self.catalog.get_face(face_id) {
                    Ok(face) => face,
                    Err(e) if e.is_not_found() => {
                        report.skip(SkippedReference {
                            face_id: Some(face_id.clone()),
                            individual_id: Some(individual.id.clone()),
                            path: None,
                            reason: "face record missing".into(),
                        });
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                match self.reference_embedding(&face.path) {
                    Ok(embedding) => entries.push(IndexEntry::new(
                        embedding,
                        FaceLabel::new(face.id, individual.id.clone()),
                    )),
                    Err(e) => report.skip(SkippedReference {
                        face_id: Some(face.id),
                        individual_id: Some(individual.id.clone()),
                        path: Some(face.path),
                        reason: e.to_string(),
                    }),
                }
            }
        }

        self.publish(entries, report)
    }

    /// Replace the index from the reference directory alone, reading each
    /// owner from the `<individual_id>___<suffix>.<ext>` file name.
    ///
    /// The directory is created when missing. Labels use the file stem as
    /// the face id.
    #[instrument(level = "info", skip(self), fields(dir = %self.reference_dir.display()))]
    pub fn rebuild_from_directory(&self) -> Result<RebuildReport> {
        let _guard = self.lock_mutations();
        fs::create_dir_all(&self.reference_dir)?;

        let mut files: Vec<PathBuf> = fs::read_dir(&self.reference_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_reference_image(path))
            .collect();
        files.sort();

        let mut report = RebuildReport::default();
        let mut entries = Vec::new();

        for path in files {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let Some(owner) = owner_from_file_name(&file_name) else {
                report.skip(SkippedReference {
                    face_id: None,
                    individual_id: None,
                    path: Some(path),
                    reason: "file name has no owner prefix".into(),
                });
                continue;
            };
            let face_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            match self.reference_embedding(&path) {
                Ok(embedding) => {
                    entries.push(IndexEntry::new(embedding, FaceLabel::new(face_id, owner)))
                }
                Err(e) => report.skip(SkippedReference {
                    face_id: Some(face_id),
                    individual_id: Some(owner.to_string()),
                    path: Some(path.clone()),
                    reason: e.to_string(),
                }),
            }
        }

        self.publish(entries, report)
    }

    /// Build the index from `entries`, skipping vectors whose dimension
    /// disagrees with the first one.
    fn publish(&self, entries: Vec<IndexEntry>, mut report: RebuildReport) -> Result<RebuildReport> {
        let dim = entries.first().map(|e| e.embedding.len());
        let mut accepted = Vec::with_capacity(entries.len());
        for entry in entries {
            if Some(entry.embedding.len()) == dim {
                accepted.push(entry);
            } else {
                report.skip(SkippedReference {
                    face_id: Some(entry.label.face_id),
                    individual_id: Some(entry.label.individual_id),
                    path: None,
                    reason: format!(
                        "embedding dimension {} does not match {}",
                        entry.embedding.len(),
                        dim.unwrap_or_default()
                    ),
                });
            }
        }

        report.loaded = accepted.len();
        self.index.build(accepted)?;
        info!(
            loaded = report.loaded,
            skipped = report.skipped.len(),
            "Reference index rebuilt"
        );
        Ok(report)
    }

    /// Create an individual, then enrol `reference` as its first face.
    ///
    /// When the reference is rejected the new individual is removed again
    /// and the enrolment error is returned.
    pub fn create_individual(
        &self,
        new: NewIndividual,
        reference: Option<&[u8]>,
    ) -> Result<(Individual, Option<Face>)> {
        let _guard = self.lock_mutations();
        let individual = self.catalog.create_individual(new)?;
        info!(individual_id = %individual.id, "Individual created");

        let Some(bytes) = reference else {
            return Ok((individual, None));
        };

        match self.enroll_unlocked(&individual.id, bytes) {
            Ok(face) => {
                let individual = self.catalog.get_individual(&individual.id)?;
                Ok((individual, Some(face)))
            }
            Err(e) => {
                if let Err(cleanup) = self.catalog.delete_individual(&individual.id) {
                    warn!(individual_id = %individual.id, error = %cleanup, "Rollback of new individual failed");
                }
                Err(e)
            }
        }
    }

    /// Store an encoded image as a new reference face of `individual_id`.
    ///
    /// Requires exactly one detectable face. On any failure the written file
    /// and any created face record are removed.
    #[instrument(level = "info", skip(self, bytes), fields(bytes = bytes.len()))]
    pub fn enroll_face(&self, individual_id: &str, bytes: &[u8]) -> Result<Face> {
        let _guard = self.lock_mutations();
        self.enroll_unlocked(individual_id, bytes)
    }

    fn enroll_unlocked(&self, individual_id: &str, bytes: &[u8]) -> Result<Face> {
        self.catalog.get_individual(individual_id)?;

        let format = image::guess_format(bytes)
            .map_err(|e| RostroError::ImageRead(format!("unrecognised image data: {e}")))?;
        let extension = format.extensions_str().first().copied().unwrap_or("jpg");

        fs::create_dir_all(&self.reference_dir)?;
        let path = self
            .reference_dir
            .join(reference_file_name(individual_id, extension));
        fs::write(&path, bytes)?;

        let mut created: Option<FaceId> = None;
        let result = self.commit_reference(individual_id, bytes, &path, &mut created);

        match result {
            Ok(face) => {
                info!(individual_id, face_id = %face.id, path = %path.display(), "Face enrolled");
                Ok(face)
            }
            Err(e) => {
                if let Some(face_id) = created {
                    self.index.remove(&face_id);
                    if let Err(cleanup) = self.catalog.detach_face(individual_id, &face_id) {
                        debug!(error = %cleanup, "Detach during rollback failed");
                    }
                    if let Err(cleanup) = self.catalog.delete_face(&face_id) {
                        warn!(face_id = %face_id, error = %cleanup, "Face record rollback failed");
                    }
                }
                remove_file_if_present(&path);
                warn!(individual_id, error = %e, "Reference rejected");
                Err(e)
            }
        }
    }

    fn commit_reference(
        &self,
        individual_id: &str,
        bytes: &[u8],
        path: &Path,
        created: &mut Option<FaceId>,
    ) -> Result<Face> {
        let image = decode_image(bytes)?;
        let embedding = self.single_face(&image)?;

        let face = self.catalog.create_face(path.to_path_buf())?;
        *created = Some(face.id.clone());

        self.catalog.attach_face(individual_id, &face.id)?;
        self.index
            .add(embedding, FaceLabel::new(face.id.clone(), individual_id))?;
        Ok(face)
    }

    /// Read an image file and enrol it.
    pub fn enroll_face_from_path(&self, individual_id: &str, path: &Path) -> Result<Face> {
        let bytes = fs::read(path)
            .map_err(|e| RostroError::ImageRead(format!("{}: {e}", path.display())))?;
        self.enroll_face(individual_id, &bytes)
    }

    /// Remove one reference face: index entry, attachment, record, file.
    pub fn remove_face(&self, individual_id: &str, face_id: &str) -> Result<()> {
        let _guard = self.lock_mutations();
        let individual = self.catalog.get_individual(individual_id)?;
        if !individual.owns_face(face_id) {
            return Err(CatalogError::FaceNotFound(face_id.to_string()).into());
        }

        let removed = self.index.remove(face_id);
        self.catalog.detach_face(individual_id, face_id)?;
        match self.catalog.get_face(face_id) {
            Ok(face) => {
                self.catalog.delete_face(face_id)?;
                remove_file_if_present(&face.path);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        info!(individual_id, face_id, index_entries = removed, "Face removed");
        Ok(())
    }

    /// Delete an individual together with every face, file and index entry.
    ///
    /// Returns the number of face records removed.
    #[instrument(level = "info", skip(self))]
    pub fn delete_individual(&self, individual_id: &str) -> Result<usize> {
        let _guard = self.lock_mutations();
        let individual = self.catalog.get_individual(individual_id)?;

        let mut removed_faces = 0;
        for face_id in &individual.faces {
            self.index.remove(face_id);
            match self.catalog.get_face(face_id) {
                Ok(face) => {
                    self.catalog.delete_face(face_id)?;
                    remove_file_if_present(&face.path);
                    removed_faces += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Entries loaded from the directory carry file stems, not face ids
        self.index.remove_individual(individual_id);
        let swept = self.sweep_reference_files(individual_id)?;

        self.catalog.delete_individual(individual_id)?;
        info!(
            individual_id,
            faces = removed_faces,
            swept_files = swept,
            "Individual deleted"
        );
        Ok(removed_faces)
    }

    fn sweep_reference_files(&self, individual_id: &str) -> Result<usize> {
        let entries = match fs::read_dir(&self.reference_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let prefix = owner_prefix(individual_id);
        let mut swept = 0;
        for path in entries.filter_map(|entry| entry.ok().map(|e| e.path())) {
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&prefix));
            if matches && path.is_file() {
                remove_file_if_present(&path);
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Replace the name fields of an individual.
    pub fn update_individual(&self, individual_id: &str, update: NewIndividual) -> Result<Individual> {
        let _guard = self.lock_mutations();
        Ok(self.catalog.update_individual(individual_id, update)?)
    }

    /// Display label for a matched individual id, or [`UNKNOWN_LABEL`].
    pub fn display_name(&self, individual_id: Option<&str>) -> Result<String> {
        let Some(id) = individual_id else {
            return Ok(UNKNOWN_LABEL.to_string());
        };
        match self.catalog.get_individual(id) {
            Ok(individual) => Ok(individual.display_name()),
            Err(e) if e.is_not_found() => Ok(UNKNOWN_LABEL.to_string()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for FaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceRegistry")
            .field("embedder", &self.embedder.name())
            .field("index", &self.index.len())
            .field("reference_dir", &self.reference_dir)
            .finish()
    }
}

fn remove_file_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Reference file removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove reference file"),
    }
}
