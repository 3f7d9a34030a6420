//! Frame pipelines: a single image, or a sampled video sequence.
//!
//! Both drive frames through the embedding provider and the identity
//! matcher, and through the object provider when one is configured.

pub mod source;
pub mod video;

use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::imaging::read_image;
use crate::matcher::{IdentityMatcher, IdentityRef, MatchOutcome};
use crate::provider::{EmbeddingProvider, FaceBox, ObjectDetection, ObjectProvider};

/// One detected face and the identity it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub bbox: FaceBox,
    /// `None` when the face is unknown
    pub identity: Option<IdentityRef>,
}

impl FaceMatch {
    pub fn individual_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.individual_id.as_str())
    }
}

/// Result of processing one image. Duplicates are kept as reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageDetection {
    pub faces: Vec<FaceMatch>,
    pub objects: Vec<ObjectDetection>,
}

impl ImageDetection {
    /// Matched individual ids without duplicates, in first-seen order.
    pub fn known_individuals(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for id in self.faces.iter().filter_map(FaceMatch::individual_id) {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    }
}

/// Stateless per-image detector. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct FramePipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    objects: Option<Arc<dyn ObjectProvider>>,
    matcher: IdentityMatcher,
}

impl FramePipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        objects: Option<Arc<dyn ObjectProvider>>,
        matcher: IdentityMatcher,
    ) -> Self {
        Self {
            embedder,
            objects,
            matcher,
        }
    }

    pub fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }

    /// Detect and resolve every face, and list every object.
    pub fn process_image(&self, image: &RgbImage) -> Result<ImageDetection> {
        let detections = self.embedder.detect(image)?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let identity = match self.matcher.match_embedding(&detection.embedding)? {
                MatchOutcome::Known(identity) => Some(identity),
                MatchOutcome::Unknown => None,
            };
            faces.push(FaceMatch {
                bbox: detection.bbox,
                identity,
            });
        }

        let objects = self.detect_objects(image)?;

        debug!(
            faces = faces.len(),
            known = faces.iter().filter(|f| f.identity.is_some()).count(),
            objects = objects.len(),
            "Image processed"
        );
        Ok(ImageDetection { faces, objects })
    }

    /// Decode `path` and run [`process_image`](Self::process_image) on it.
    pub fn process_path(&self, path: &Path) -> Result<(RgbImage, ImageDetection)> {
        let image = read_image(path)?;
        let detection = self.process_image(&image)?;
        Ok((image, detection))
    }

    /// Objects from the configured provider; empty when there is none.
    pub fn detect_objects(&self, image: &RgbImage) -> Result<Vec<ObjectDetection>> {
        match &self.objects {
            Some(provider) => provider.detect(image),
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("embedder", &self.embedder.name())
            .field("objects", &self.objects.as_ref().map(|o| o.name()))
            .field("threshold", &self.matcher.threshold())
            .finish()
    }
}
