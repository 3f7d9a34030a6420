//! Reference index over known face embeddings.
//!
//! The authoritative state is an append-only arena of `(embedding, label)`
//! entries. The k-d tree is a derived cache rebuilt after every mutation,
//! which keeps insertion and removal trivially correct at reference-catalog
//! scale (hundreds to low thousands of faces).
//!
//! ## Concurrency
//!
//! The whole snapshot sits behind an `RwLock`. Queries take the shared lock,
//! so any number of requests can match in parallel. `build` constructs the
//! replacement snapshot before taking the exclusive lock and only swaps it
//! in. `add` and `remove` hold the exclusive lock for the rebuild, so a
//! concurrent reader sees either the old snapshot or the new one, never a
//! partial tree.

mod kdtree;

pub use kdtree::{euclidean_distance, squared_distance, KdTree};

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::catalog::{FaceId, IndividualId};
use crate::error::{Result, RostroError};

/// Identifies the reference sample a stored embedding came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceLabel {
    /// Face record (or reference file stem when rebuilt from disk)
    pub face_id: FaceId,
    /// Individual owning the face
    pub individual_id: IndividualId,
}

impl FaceLabel {
    pub fn new(face_id: impl Into<FaceId>, individual_id: impl Into<IndividualId>) -> Self {
        Self {
            face_id: face_id.into(),
            individual_id: individual_id.into(),
        }
    }
}

/// One stored reference vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub embedding: Vec<f32>,
    pub label: FaceLabel,
}

impl IndexEntry {
    pub fn new(embedding: Vec<f32>, label: FaceLabel) -> Self {
        Self { embedding, label }
    }
}

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub label: FaceLabel,
    /// Euclidean distance from the query
    pub distance: f32,
}

/// Immutable published state.
#[derive(Debug, Default)]
struct Snapshot {
    embeddings: Vec<Vec<f32>>,
    labels: Vec<FaceLabel>,
    tree: Option<KdTree>,
}

impl Snapshot {
    fn from_parts(embeddings: Vec<Vec<f32>>, labels: Vec<FaceLabel>) -> Self {
        let tree = if embeddings.is_empty() {
            None
        } else {
            Some(KdTree::build(&embeddings))
        };
        Self {
            embeddings,
            labels,
            tree,
        }
    }

    fn dim(&self) -> Option<usize> {
        self.tree.as_ref().map(KdTree::dim)
    }
}

/// Thread-safe nearest-neighbour index of reference faces.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    snapshot: RwLock<Snapshot>,
}

impl ReferenceIndex {
    /// Create an index in the explicit empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index contents entirely.
    ///
    /// An empty `entries` list leaves the index in the empty state, where
    /// [`query`](Self::query) fails with [`RostroError::IndexNotReady`].
    #[instrument(level = "debug", skip_all, fields(entries = entries.len()))]
    pub fn build(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let dim = check_dimensions(&entries)?;
        let (embeddings, labels): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .map(|entry| (entry.embedding, entry.label))
            .unzip();

        let replacement = Snapshot::from_parts(embeddings, labels);
        let count = replacement.labels.len();

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = replacement;

        if count == 0 {
            info!("Reference index built empty");
        } else {
            info!(references = count, dim, "Reference index built");
        }
        Ok(())
    }

    /// Append one embedding. The next query observes it.
    pub fn add(&self, embedding: Vec<f32>, label: FaceLabel) -> Result<()> {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(expected) = guard.dim() {
            if embedding.len() != expected {
                return Err(RostroError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        } else if embedding.is_empty() {
            return Err(RostroError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }

        let mut embeddings = std::mem::take(&mut guard.embeddings);
        let mut labels = std::mem::take(&mut guard.labels);
        debug!(face_id = %label.face_id, individual_id = %label.individual_id, "Adding reference");
        embeddings.push(embedding);
        labels.push(label);

        *guard = Snapshot::from_parts(embeddings, labels);
        Ok(())
    }

    /// Drop every vector whose label carries `face_id`.
    ///
    /// Returns the number of removed entries.
    pub fn remove(&self, face_id: &str) -> usize {
        self.retain(|label| label.face_id != face_id)
    }

    /// Drop every vector owned by `individual_id`.
    pub fn remove_individual(&self, individual_id: &str) -> usize {
        self.retain(|label| label.individual_id != individual_id)
    }

    fn retain(&self, keep: impl Fn(&FaceLabel) -> bool) -> usize {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.labels.len();

        let embeddings = std::mem::take(&mut guard.embeddings);
        let labels = std::mem::take(&mut guard.labels);
        let (embeddings, labels): (Vec<_>, Vec<_>) = embeddings
            .into_iter()
            .zip(labels)
            .filter(|(_, label)| keep(label))
            .unzip();

        *guard = Snapshot::from_parts(embeddings, labels);
        let removed = before - guard.labels.len();
        if removed > 0 {
            debug!(removed, remaining = guard.labels.len(), "Removed references");
        }
        removed
    }

    /// Return the `k` nearest references in ascending distance order.
    ///
    /// Equal distances are returned in insertion order.
    pub fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        let tree = guard.tree.as_ref().ok_or(RostroError::IndexNotReady)?;

        if embedding.len() != tree.dim() {
            return Err(RostroError::DimensionMismatch {
                expected: tree.dim(),
                actual: embedding.len(),
            });
        }

        Ok(tree
            .nearest(&guard.embeddings, embedding, k)
            .into_iter()
            .map(|(position, distance)| Neighbor {
                label: guard.labels[position].clone(),
                distance,
            })
            .collect())
    }

    /// Number of stored references.
    pub fn len(&self) -> usize {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .labels
            .len()
    }

    /// True while the index is in the empty (not ready) state.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimension, once populated.
    pub fn dim(&self) -> Option<usize> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dim()
    }

    /// Labels currently stored, in insertion order.
    pub fn labels(&self) -> Vec<FaceLabel> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .labels
            .clone()
    }
}

/// All entries must share one non-zero dimension.
fn check_dimensions(entries: &[IndexEntry]) -> Result<usize> {
    let Some(first) = entries.first() else {
        return Ok(0);
    };
    let expected = first.embedding.len();
    if expected == 0 {
        return Err(RostroError::DimensionMismatch {
            expected: 1,
            actual: 0,
        });
    }
    if let Some(bad) = entries.iter().find(|e| e.embedding.len() != expected) {
        return Err(RostroError::DimensionMismatch {
            expected,
            actual: bad.embedding.len(),
        });
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(face: &str, owner: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry::new(embedding, FaceLabel::new(face, owner))
    }

    #[test]
    fn test_query_before_build_is_not_ready() {
        let index = ReferenceIndex::new();
        let err = index.query(&[0.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, RostroError::IndexNotReady));
    }

    #[test]
    fn test_build_empty_is_not_ready() {
        let index = ReferenceIndex::new();
        index.build(vec![entry("f1", "a", vec![0.0, 0.0])]).unwrap();
        index.build(Vec::new()).unwrap();
        assert!(index.is_empty());
        assert!(matches!(
            index.query(&[0.0, 0.0], 1),
            Err(RostroError::IndexNotReady)
        ));
    }

    #[test]
    fn test_self_match() {
        let index = ReferenceIndex::new();
        let target = vec![0.12, -0.4, 0.33, 0.9];
        index
            .build(vec![
                entry("f1", "a", vec![1.0, 1.0, 1.0, 1.0]),
                entry("f2", "b", target.clone()),
                entry("f3", "c", vec![-1.0, 0.0, 0.5, 0.2]),
            ])
            .unwrap();

        let hits = index.query(&target, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label.face_id, "f2");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_query_orders_by_distance() {
        let index = ReferenceIndex::new();
        index
            .build(vec![
                entry("far", "a", vec![3.0, 0.0]),
                entry("near", "b", vec![1.0, 0.0]),
                entry("mid", "c", vec![2.0, 0.0]),
            ])
            .unwrap();

        let hits = index.query(&[0.0, 0.0], 3).unwrap();
        let faces: Vec<&str> = hits.iter().map(|h| h.label.face_id.as_str()).collect();
        assert_eq!(faces, vec!["near", "mid", "far"]);
        assert_eq!(hits[1].distance, 2.0);
    }

    #[test]
    fn test_add_is_visible_immediately() {
        let index = ReferenceIndex::new();
        index.add(vec![5.0, 5.0], FaceLabel::new("f1", "a")).unwrap();
        let hits = index.query(&[5.0, 5.0], 1).unwrap();
        assert_eq!(hits[0].label.face_id, "f1");

        index.add(vec![0.0, 0.0], FaceLabel::new("f2", "b")).unwrap();
        let hits = index.query(&[0.1, 0.0], 1).unwrap();
        assert_eq!(hits[0].label.face_id, "f2");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let index = ReferenceIndex::new();
        index.add(vec![0.0, 0.0], FaceLabel::new("f1", "a")).unwrap();
        let err = index
            .add(vec![0.0, 0.0, 0.0], FaceLabel::new("f2", "a"))
            .unwrap_err();
        assert!(matches!(
            err,
            RostroError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_build_rejects_mixed_dimensions() {
        let index = ReferenceIndex::new();
        let result = index.build(vec![
            entry("f1", "a", vec![0.0, 0.0]),
            entry("f2", "a", vec![0.0]),
        ]);
        assert!(matches!(
            result,
            Err(RostroError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_remove_drops_stale_match() {
        let index = ReferenceIndex::new();
        index
            .build(vec![
                entry("f1", "a", vec![0.0, 0.0]),
                entry("f2", "b", vec![10.0, 10.0]),
            ])
            .unwrap();

        assert_eq!(index.remove("f1"), 1);
        let hits = index.query(&[0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].label.face_id, "f2");

        assert_eq!(index.remove("f2"), 1);
        assert!(matches!(
            index.query(&[0.0, 0.0], 1),
            Err(RostroError::IndexNotReady)
        ));
        assert_eq!(index.remove("missing"), 0);
    }

    #[test]
    fn test_remove_individual() {
        let index = ReferenceIndex::new();
        index
            .build(vec![
                entry("f1", "a", vec![0.0]),
                entry("f2", "a", vec![1.0]),
                entry("f3", "b", vec![2.0]),
            ])
            .unwrap();
        assert_eq!(index.remove_individual("a"), 2);
        assert_eq!(index.labels(), vec![FaceLabel::new("f3", "b")]);
    }

    #[test]
    fn test_tie_break_is_insertion_order() {
        let index = ReferenceIndex::new();
        index
            .build(vec![
                entry("first", "a", vec![1.0, 0.0]),
                entry("second", "b", vec![-1.0, 0.0]),
            ])
            .unwrap();

        for _ in 0..10 {
            let hits = index.query(&[0.0, 0.0], 1).unwrap();
            assert_eq!(hits[0].label.face_id, "first");
        }
    }

    #[test]
    fn test_concurrent_queries_during_adds() {
        let index = Arc::new(ReferenceIndex::new());
        index.add(vec![0.0, 0.0], FaceLabel::new("seed", "a")).unwrap();

        let writer = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for i in 0..50 {
                    index
                        .add(vec![i as f32, 1.0], FaceLabel::new(format!("f{i}"), "b"))
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let hits = index.query(&[0.0, 0.0], 1).unwrap();
                        assert_eq!(hits[0].label.face_id, "seed");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(index.len(), 51);
    }
}
