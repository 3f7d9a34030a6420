//! Mock embedding provider for testing and offline use.

use image::RgbImage;
use sha3::{Digest, Sha3_256};

use super::{EmbeddingProvider, FaceBox, FaceDetection};
use crate::error::Result;

/// Embedding dimension produced by [`MockEmbeddingProvider`].
pub const MOCK_EMBEDDING_DIM: usize = 128;

/// Deterministic provider that needs no model.
///
/// - A uniform (single-colour) image contains no face.
/// - Any other image contains exactly one face covering its central half.
///
/// The embedding is derived from a SHA3 digest of the pixels, so the same
/// image always produces the same embedding and unrelated images land far
/// apart. WARNING: this recognises identical images, not people.
#[derive(Debug, Clone, Default)]
pub struct MockEmbeddingProvider;

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    /// Derive a `MOCK_EMBEDDING_DIM`-dimensional vector from pixel content.
    pub fn embed(image: &RgbImage) -> Vec<f32> {
        let mut embedding = Vec::with_capacity(MOCK_EMBEDDING_DIM);
        let mut block: u32 = 0;
        while embedding.len() < MOCK_EMBEDDING_DIM {
            let mut hasher = Sha3_256::new();
            hasher.update(image.width().to_le_bytes());
            hasher.update(image.height().to_le_bytes());
            hasher.update(image.as_raw());
            hasher.update(block.to_le_bytes());
            hasher.update(b"rostro-mock-embedding");

            embedding.extend(
                hasher
                    .finalize()
                    .iter()
                    .map(|b| *b as f32 / 255.0 - 0.5)
                    .take(MOCK_EMBEDDING_DIM - embedding.len()),
            );
            block += 1;
        }
        embedding
    }

    fn is_uniform(image: &RgbImage) -> bool {
        let mut pixels = image.pixels();
        match pixels.next() {
            Some(first) => pixels.all(|p| p == first),
            None => true,
        }
    }
}

impl EmbeddingProvider for MockEmbeddingProvider {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceDetection>> {
        if Self::is_uniform(image) {
            return Ok(Vec::new());
        }

        let (w, h) = (image.width() as i32, image.height() as i32);
        let bbox = FaceBox::new(h / 4, 3 * w / 4, 3 * h / 4, w / 4);
        Ok(vec![FaceDetection::new(bbox, Self::embed(image))])
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
