//! Scripted providers for tests.
//!
//! Responses are keyed on the colour of an image's top-left pixel, which
//! survives uniform downscaling of solid-colour frames.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::RgbImage;

use super::{EmbeddingProvider, FaceDetection, ObjectDetection, ObjectProvider};
use crate::error::{Result, RostroError};

/// Colour of the top-left pixel, or black for an empty image.
pub fn frame_key(image: &RgbImage) -> [u8; 3] {
    image
        .get_pixel_checked(0, 0)
        .map(|p| p.0)
        .unwrap_or([0, 0, 0])
}

/// Embedding provider returning pre-recorded faces per frame colour.
///
/// Unscripted colours report no faces.
#[derive(Debug, Default)]
pub struct ScriptedEmbeddingProvider {
    scripts: HashMap<[u8; 3], Vec<FaceDetection>>,
    failures: HashSet<[u8; 3]>,
    calls: AtomicUsize,
}

impl ScriptedEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `faces` for images whose top-left pixel is `key`.
    pub fn with_faces(mut self, key: [u8; 3], faces: Vec<FaceDetection>) -> Self {
        self.scripts.insert(key, faces);
        self
    }

    /// Fail with a provider error for images whose top-left pixel is `key`.
    pub fn failing_on(mut self, key: [u8; 3]) -> Self {
        self.failures.insert(key);
        self
    }

    /// Number of `detect` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for ScriptedEmbeddingProvider {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = frame_key(image);
        if self.failures.contains(&key) {
            return Err(RostroError::Provider(format!(
                "scripted failure for frame {}",
                hex::encode(key)
            )));
        }
        Ok(self.scripts.get(&key).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Object provider returning pre-recorded detections per frame colour.
#[derive(Debug, Default)]
pub struct ScriptedObjectProvider {
    scripts: HashMap<[u8; 3], Vec<ObjectDetection>>,
    calls: AtomicUsize,
}

impl ScriptedObjectProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects(mut self, key: [u8; 3], objects: Vec<ObjectDetection>) -> Self {
        self.scripts.insert(key, objects);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ObjectProvider for ScriptedObjectProvider {
    fn detect(&self, image: &RgbImage) -> Result<Vec<ObjectDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .scripts
            .get(&frame_key(image))
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FaceBox, ObjectBox};
    use image::Rgb;

    #[test]
    fn test_frame_key() {
        let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        assert_eq!(frame_key(&image), [1, 2, 3]);
        assert_eq!(frame_key(&RgbImage::new(0, 0)), [0, 0, 0]);
    }

    #[test]
    fn test_scripted_faces_and_call_count() {
        let face = FaceDetection::new(FaceBox::new(0, 4, 4, 0), vec![1.0, 2.0]);
        let provider = ScriptedEmbeddingProvider::new().with_faces([9, 9, 9], vec![face.clone()]);

        let scripted = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        let other = RgbImage::from_pixel(4, 4, Rgb([0, 0, 1]));

        assert_eq!(provider.detect(&scripted).unwrap(), vec![face]);
        assert!(provider.detect(&other).unwrap().is_empty());
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn test_scripted_failure() {
        let provider = ScriptedEmbeddingProvider::new().failing_on([255, 0, 0]);
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        assert!(matches!(
            provider.detect(&image),
            Err(RostroError::Provider(_))
        ));
    }

    #[test]
    fn test_scripted_objects() {
        let provider = ScriptedObjectProvider::new().with_objects(
            [5, 5, 5],
            vec![ObjectDetection::new("person", ObjectBox::new(0, 0, 2, 2))],
        );
        let image = RgbImage::from_pixel(2, 2, Rgb([5, 5, 5]));
        let found = provider.detect(&image).unwrap();
        assert_eq!(found[0].label, "person");
    }
}
