//! End-to-end behaviour of the identity pipeline: index, matcher, image and
//! video pipelines, and the registry that keeps them consistent.

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use rostro_core::catalog::{Catalog, CatalogResult, Face, Individual};
use rostro_core::provider::{ScriptedEmbeddingProvider, ScriptedObjectProvider};
use rostro_core::{
    CancelFlag, EmbeddingProvider, FaceBox, FaceDetection, FaceLabel, FaceRegistry,
    FramePipeline, IdentityMatcher, ImageDetection, IndexEntry, LocalCatalog, MatchOutcome,
    MemoryFrameSource, MockEmbeddingProvider, NewIndividual, ObjectBox, ObjectDetection,
    PreviewControl, ReferenceIndex, RostroError, VideoOptions, VideoPipeline,
};
use tempfile::TempDir;

const ANA: [u8; 3] = [10, 10, 10];
const NOBODY: [u8; 3] = [90, 90, 90];

/// A non-uniform image the mock provider reports as one face.
fn portrait(seed: u8) -> RgbImage {
    RgbImage::from_fn(32, 32, |x, y| {
        Rgb([(x as u8).wrapping_mul(seed), (y as u8) ^ seed, seed])
    })
}

fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn solid(color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(50, 40, Rgb(color))
}

fn one_face(embedding: Vec<f32>) -> Vec<FaceDetection> {
    vec![FaceDetection::new(FaceBox::new(4, 30, 30, 4), embedding)]
}

/// Index holding a single reference for individual "ana" at the origin.
fn ana_index() -> Arc<ReferenceIndex> {
    let index = Arc::new(ReferenceIndex::new());
    index
        .build(vec![IndexEntry::new(
            vec![0.0, 0.0],
            FaceLabel::new("face-ana", "ana"),
        )])
        .unwrap();
    index
}

fn video_pipeline(
    embedder: Arc<ScriptedEmbeddingProvider>,
    objects: Option<ScriptedObjectProvider>,
    frame_skip: usize,
    output: &TempDir,
) -> VideoPipeline {
    let frames = FramePipeline::new(
        embedder,
        objects.map(|o| Arc::new(o) as Arc<dyn rostro_core::ObjectProvider>),
        IdentityMatcher::new(ana_index(), 0.6),
    );
    let options = VideoOptions {
        frame_skip,
        downscale: 0.6,
        live: true,
        output_dir: output.path().to_path_buf(),
    };
    VideoPipeline::new(frames, options).unwrap()
}

#[test]
fn test_self_match_after_enrolment() {
    let dir = TempDir::new().unwrap();
    let index = Arc::new(ReferenceIndex::new());
    let registry = FaceRegistry::new(
        Arc::new(LocalCatalog::in_memory()),
        index.clone(),
        Arc::new(MockEmbeddingProvider::new()),
        dir.path().join("referencia"),
    );

    let image = portrait(3);
    let (ana, face) = registry
        .create_individual(NewIndividual::new("Ana"), Some(&png_bytes(&image)))
        .unwrap();
    let face = face.unwrap();

    let embedding = MockEmbeddingProvider::new().detect(&image).unwrap()[0]
        .embedding
        .clone();
    let hits = index.query(&embedding, 1).unwrap();

    assert_eq!(hits[0].label.face_id, face.id);
    assert_eq!(hits[0].label.individual_id, ana.id);
    assert!(hits[0].distance < 1e-6);
}

#[test]
fn test_threshold_boundary() {
    let index = Arc::new(ReferenceIndex::new());
    index
        .build(vec![IndexEntry::new(
            vec![0.0, 0.0, 0.0],
            FaceLabel::new("face-1", "ind-1"),
        )])
        .unwrap();
    let matcher = IdentityMatcher::new(index, 0.6);

    let near = matcher.match_embedding(&[0.59, 0.0, 0.0]).unwrap();
    let far = matcher.match_embedding(&[0.61, 0.0, 0.0]).unwrap();

    assert_eq!(near.individual_id(), Some("ind-1"));
    assert_eq!(far, MatchOutcome::Unknown);
}

#[test]
fn test_video_keeps_one_frame_per_individual() {
    let output = TempDir::new().unwrap();
    let embedder = Arc::new(ScriptedEmbeddingProvider::new().with_faces(ANA, one_face(vec![0.05, 0.0])));
    let pipeline = video_pipeline(embedder, None, 1, &output);

    // Ana appears in three of five sampled frames
    let frames = vec![solid(ANA), solid(NOBODY), solid(ANA), solid(NOBODY), solid(ANA)];
    let result = pipeline
        .run(MemoryFrameSource::new(frames), &CancelFlag::new(), None)
        .unwrap();

    assert_eq!(result.per_individual_first_frame.len(), 1);
    let sighting = &result.per_individual_first_frame[0];
    assert_eq!(sighting.individual_id, "ana");
    assert_eq!(sighting.frame_index, 0);
    assert!(sighting.frame_path.ends_with("ana_frame_0.jpg"));
    assert_eq!(fs::read_dir(output.path()).unwrap().count(), 1);
}

#[test]
fn test_frame_sampling_count() {
    let output = TempDir::new().unwrap();
    let embedder = Arc::new(ScriptedEmbeddingProvider::new());
    let pipeline = video_pipeline(embedder.clone(), None, 5, &output);

    let mut sampled = Vec::new();
    let mut preview = |index: usize, frame: &RgbImage, _: &ImageDetection| {
        // Frames are downscaled before detection
        assert_eq!(frame.dimensions(), (30, 24));
        sampled.push(index);
        PreviewControl::Continue
    };

    let frames = (0..23).map(|_| solid(NOBODY)).collect();
    let result = pipeline
        .run(
            MemoryFrameSource::new(frames),
            &CancelFlag::new(),
            Some(&mut preview as &mut dyn rostro_core::FramePreview),
        )
        .unwrap();

    assert_eq!(embedder.calls(), 5);
    assert_eq!(sampled, vec![0, 5, 10, 15, 20]);
    assert_eq!(result.frames_read, 23);
    assert_eq!(result.frames_sampled, 5);
}

#[test]
fn test_object_labels_deduplicated_and_sorted() {
    let output = TempDir::new().unwrap();
    let objects = ScriptedObjectProvider::new()
        .with_objects(
            NOBODY,
            vec![ObjectDetection::new("person", ObjectBox::new(0, 0, 10, 10))],
        )
        .with_objects(
            ANA,
            vec![
                ObjectDetection::new("person", ObjectBox::new(0, 0, 10, 10)),
                ObjectDetection::new("car", ObjectBox::new(10, 10, 20, 20)),
            ],
        );
    let embedder = Arc::new(ScriptedEmbeddingProvider::new());
    let pipeline = video_pipeline(embedder, Some(objects), 1, &output);

    let frames = vec![solid(NOBODY), solid(NOBODY), solid(ANA), solid(NOBODY)];
    let result = pipeline
        .run(MemoryFrameSource::new(frames), &CancelFlag::new(), None)
        .unwrap();

    assert_eq!(result.distinct_object_labels, vec!["car", "person"]);
}

#[test]
fn test_rejected_reference_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let reference_dir = dir.path().join("referencia");
    let catalog = Arc::new(LocalCatalog::in_memory());
    let two_faces = Arc::new(ScriptedEmbeddingProvider::new().with_faces(
        [1, 2, 3],
        vec![
            FaceDetection::new(FaceBox::new(0, 5, 5, 0), vec![0.0, 1.0]),
            FaceDetection::new(FaceBox::new(0, 12, 5, 7), vec![1.0, 0.0]),
        ],
    ));
    let registry = FaceRegistry::new(
        catalog.clone(),
        Arc::new(ReferenceIndex::new()),
        two_faces,
        &reference_dir,
    );
    let (luis, _) = registry
        .create_individual(NewIndividual::new("Luis"), None)
        .unwrap();

    for (image, expected) in [(solid([1, 2, 3]), 2), (solid([7, 7, 7]), 0)] {
        let err = registry
            .enroll_face(&luis.id, &png_bytes(&image))
            .unwrap_err();
        assert!(
            matches!(err, RostroError::FaceCount { found } if found == expected),
            "unexpected error: {err}"
        );
    }

    assert_eq!(catalog.face_count(), 0);
    assert!(registry.index().is_empty());
    assert_eq!(fs::read_dir(&reference_dir).unwrap().count(), 0);
}

#[test]
fn test_empty_index_safety() {
    let index = Arc::new(ReferenceIndex::new());
    let matcher = IdentityMatcher::with_default_threshold(index.clone());

    assert_eq!(
        matcher.match_embedding(&[0.1, 0.2]).unwrap(),
        MatchOutcome::Unknown
    );
    assert!(matches!(
        index.query(&[0.1, 0.2], 1),
        Err(RostroError::IndexNotReady)
    ));
}

#[test]
fn test_deleted_individual_no_longer_matches() {
    let dir = TempDir::new().unwrap();
    let index = Arc::new(ReferenceIndex::new());
    let embedder = Arc::new(MockEmbeddingProvider::new());
    let registry = FaceRegistry::new(
        Arc::new(LocalCatalog::in_memory()),
        index.clone(),
        embedder.clone(),
        dir.path().join("referencia"),
    );
    let image = portrait(5);
    let (ana, _) = registry
        .create_individual(NewIndividual::new("Ana"), Some(&png_bytes(&image)))
        .unwrap();

    let pipeline = FramePipeline::new(
        embedder,
        None,
        IdentityMatcher::with_default_threshold(index.clone()),
    );
    assert_eq!(
        pipeline.process_image(&image).unwrap().known_individuals(),
        vec![ana.id.as_str()]
    );

    registry.delete_individual(&ana.id).unwrap();
    assert!(pipeline
        .process_image(&image)
        .unwrap()
        .known_individuals()
        .is_empty());
}

#[test]
fn test_concurrent_detection_during_enrolment() {
    let dir = TempDir::new().unwrap();
    let index = Arc::new(ReferenceIndex::new());
    let embedder = Arc::new(MockEmbeddingProvider::new());
    let registry = FaceRegistry::new(
        Arc::new(LocalCatalog::in_memory()),
        index.clone(),
        embedder.clone(),
        dir.path().join("referencia"),
    );
    let pipeline = FramePipeline::new(
        embedder,
        None,
        IdentityMatcher::with_default_threshold(index.clone()),
    );
    let (ana, _) = registry
        .create_individual(NewIndividual::new("Ana"), None)
        .unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let pipeline = pipeline.clone();
            scope.spawn(move || {
                for seed in 0..20u8 {
                    let detection = pipeline.process_image(&portrait(seed + 1)).unwrap();
                    assert_eq!(detection.faces.len(), 1);
                }
            });
        }
        for seed in 100..110u8 {
            registry
                .enroll_face(&ana.id, &png_bytes(&portrait(seed)))
                .unwrap();
        }
    });

    assert_eq!(index.len(), 10);
}

/// Local catalog that reports each attachment and then stalls, widening the
/// gap between attaching a face and indexing it.
struct StallingCatalog {
    inner: LocalCatalog,
    attached: Mutex<Sender<()>>,
}

impl Catalog for StallingCatalog {
    fn create_individual(&self, new: NewIndividual) -> CatalogResult<Individual> {
        self.inner.create_individual(new)
    }
    fn get_individual(&self, id: &str) -> CatalogResult<Individual> {
        self.inner.get_individual(id)
    }
    fn list_individuals(&self) -> CatalogResult<Vec<Individual>> {
        self.inner.list_individuals()
    }
    fn update_individual(&self, id: &str, update: NewIndividual) -> CatalogResult<Individual> {
        self.inner.update_individual(id, update)
    }
    fn delete_individual(&self, id: &str) -> CatalogResult<()> {
        self.inner.delete_individual(id)
    }
    fn create_face(&self, path: PathBuf) -> CatalogResult<Face> {
        self.inner.create_face(path)
    }
    fn get_face(&self, id: &str) -> CatalogResult<Face> {
        self.inner.get_face(id)
    }
    fn delete_face(&self, id: &str) -> CatalogResult<()> {
        self.inner.delete_face(id)
    }
    fn attach_face(&self, individual_id: &str, face_id: &str) -> CatalogResult<Individual> {
        let attached = self.inner.attach_face(individual_id, face_id)?;
        let _ = self.attached.lock().unwrap().send(());
        std::thread::sleep(Duration::from_millis(100));
        Ok(attached)
    }
    fn detach_face(&self, individual_id: &str, face_id: &str) -> CatalogResult<Individual> {
        self.inner.detach_face(individual_id, face_id)
    }
    fn list_faces_of(&self, individual_id: &str) -> CatalogResult<Vec<Face>> {
        self.inner.list_faces_of(individual_id)
    }
    fn find_owner_of_face(&self, face_id: &str) -> CatalogResult<Individual> {
        self.inner.find_owner_of_face(face_id)
    }
}

#[test]
fn test_delete_during_enrolment_leaves_no_index_entry() {
    let dir = TempDir::new().unwrap();
    let (tx, rx) = mpsc::channel();
    let catalog = Arc::new(StallingCatalog {
        inner: LocalCatalog::in_memory(),
        attached: Mutex::new(tx),
    });
    let index = Arc::new(ReferenceIndex::new());
    let reference_dir = dir.path().join("referencia");
    let registry = FaceRegistry::new(
        catalog.clone(),
        index.clone(),
        Arc::new(MockEmbeddingProvider::new()),
        &reference_dir,
    );
    let (ana, _) = registry
        .create_individual(NewIndividual::new("Ana"), None)
        .unwrap();

    let (enrolled, deleted) = std::thread::scope(|scope| {
        let (registry, ana_id) = (&registry, &ana.id);
        let deleter = scope.spawn(move || {
            rx.recv().unwrap();
            registry.delete_individual(ana_id)
        });
        let enrolled = registry.enroll_face(&ana.id, &png_bytes(&portrait(5)));
        (enrolled, deleter.join().unwrap())
    });

    // The delete waits for the enrolment, then removes what it added
    enrolled.unwrap();
    assert_eq!(deleted.unwrap(), 1);
    assert!(index.is_empty());
    assert!(index
        .labels()
        .iter()
        .all(|label| label.individual_id != ana.id));
    assert!(catalog.get_individual(&ana.id).unwrap_err().is_not_found());
    assert_eq!(fs::read_dir(&reference_dir).unwrap().count(), 0);
}
