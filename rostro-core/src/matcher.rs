//! Identity decision over nearest-neighbour results.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{FaceId, IndividualId};
use crate::config::DEFAULT_MATCH_THRESHOLD;
use crate::error::{Result, RostroError};
use crate::index::ReferenceIndex;

/// Reference to the individual a face resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRef {
    pub individual_id: IndividualId,
    /// Reference face that produced the match
    pub face_id: FaceId,
    pub distance: f32,
}

/// Outcome of matching one detected face.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Known(IdentityRef),
    /// No reference is close enough, or no reference is loaded yet.
    Unknown,
}

impl MatchOutcome {
    pub fn individual_id(&self) -> Option<&str> {
        match self {
            Self::Known(identity) => Some(&identity.individual_id),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// Read-only matcher over a shared [`ReferenceIndex`].
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    index: Arc<ReferenceIndex>,
    threshold: f32,
}

impl IdentityMatcher {
    pub fn new(index: Arc<ReferenceIndex>, threshold: f32) -> Self {
        Self { index, threshold }
    }

    /// Matcher with the default 0.6 threshold.
    pub fn with_default_threshold(index: Arc<ReferenceIndex>) -> Self {
        Self::new(index, DEFAULT_MATCH_THRESHOLD)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn index(&self) -> &Arc<ReferenceIndex> {
        &self.index
    }

    /// Resolve one face embedding.
    ///
    /// An empty index yields `Unknown` so detection can proceed before any
    /// reference exists. A match requires `distance < threshold`.
    pub fn match_embedding(&self, embedding: &[f32]) -> Result<MatchOutcome> {
        let nearest = match self.index.query(embedding, 1) {
            Ok(hits) => hits.into_iter().next(),
            Err(RostroError::IndexNotReady) => None,
            Err(e) => return Err(e),
        };

        Ok(match nearest {
            Some(hit) if hit.distance < self.threshold => MatchOutcome::Known(IdentityRef {
                individual_id: hit.label.individual_id,
                face_id: hit.label.face_id,
                distance: hit.distance,
            }),
            _ => MatchOutcome::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FaceLabel, IndexEntry};

    fn index_with_origin() -> Arc<ReferenceIndex> {
        let index = Arc::new(ReferenceIndex::new());
        index
            .build(vec![IndexEntry::new(
                vec![0.0, 0.0, 0.0],
                FaceLabel::new("face-1", "ind-1"),
            )])
            .unwrap();
        index
    }

    #[test]
    fn test_threshold_boundary() {
        let matcher = IdentityMatcher::new(index_with_origin(), 0.6);

        let inside = matcher.match_embedding(&[0.59, 0.0, 0.0]).unwrap();
        assert_eq!(inside.individual_id(), Some("ind-1"));

        let outside = matcher.match_embedding(&[0.61, 0.0, 0.0]).unwrap();
        assert_eq!(outside, MatchOutcome::Unknown);
    }

    #[test]
    fn test_distance_equal_to_threshold_is_unknown() {
        let matcher = IdentityMatcher::new(index_with_origin(), 0.5);
        let outcome = matcher.match_embedding(&[0.0, 0.0, 0.5]).unwrap();
        assert!(!outcome.is_known());
    }

    #[test]
    fn test_empty_index_returns_unknown() {
        let matcher = IdentityMatcher::with_default_threshold(Arc::new(ReferenceIndex::new()));
        let outcome = matcher.match_embedding(&[0.0; 128]).unwrap();
        assert_eq!(outcome, MatchOutcome::Unknown);
    }

    #[test]
    fn test_known_carries_face_and_distance() {
        let matcher = IdentityMatcher::with_default_threshold(index_with_origin());
        match matcher.match_embedding(&[0.0, 0.1, 0.0]).unwrap() {
            MatchOutcome::Known(identity) => {
                assert_eq!(identity.face_id, "face-1");
                assert!((identity.distance - 0.1).abs() < 1e-6);
            }
            MatchOutcome::Unknown => panic!("expected a match"),
        }
    }

    #[test]
    fn test_dimension_mismatch_propagates() {
        let matcher = IdentityMatcher::with_default_threshold(index_with_origin());
        assert!(matches!(
            matcher.match_embedding(&[0.0, 0.0]),
            Err(RostroError::DimensionMismatch { .. })
        ));
    }
}
