//! Rostro Core - face identity resolution for images and video
//!
//! This crate resolves faces in images or video frames to known individuals
//! and reports detected object categories alongside.
//!
//! # Components
//!
//! - [`ReferenceIndex`] - nearest-neighbour search over reference embeddings,
//!   shared across concurrent requests
//! - [`IdentityMatcher`] - accept/reject decision against a distance threshold
//! - [`FramePipeline`] / [`VideoPipeline`] - single image and sampled video
//!   detection with per-individual deduplication
//! - [`FaceRegistry`] - keeps the catalog, the reference files and the index
//!   consistent
//! - [`EmbeddingProvider`] / [`ObjectProvider`] - pluggable detection backends
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rostro_core::{
//!     FaceRegistry, FramePipeline, IdentityMatcher, LocalCatalog,
//!     MockEmbeddingProvider, NewIndividual, ReferenceIndex,
//! };
//!
//! # fn example() -> rostro_core::Result<()> {
//! let index = Arc::new(ReferenceIndex::new());
//! let embedder = Arc::new(MockEmbeddingProvider::new());
//! let registry = FaceRegistry::new(
//!     Arc::new(LocalCatalog::open("catalog.json")?),
//!     index.clone(),
//!     embedder.clone(),
//!     "imagenes/referencia",
//! );
//! registry.rebuild_index()?;
//!
//! let portrait = std::fs::read("ana.jpg")?;
//! let (ana, _) = registry.create_individual(NewIndividual::new("Ana"), Some(&portrait))?;
//!
//! let pipeline = FramePipeline::new(embedder, None, IdentityMatcher::with_default_threshold(index));
//! let (_, detection) = pipeline.process_path("group.jpg".as_ref())?;
//! assert!(detection.known_individuals().contains(&ana.id.as_str()));
//! # Ok(())
//! # }
//! ```

pub mod annotate;
pub mod catalog;
pub mod config;
pub mod error;
pub mod imaging;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod provider;
pub mod registry;

// Re-export main types for convenience
pub use catalog::{
    Catalog, CatalogError, Face, FaceId, Individual, IndividualId, LocalCatalog, NewIndividual,
};
pub use config::RecognitionConfig;
pub use error::{Result, RostroError};
pub use index::{FaceLabel, IndexEntry, Neighbor, ReferenceIndex};
pub use matcher::{IdentityMatcher, IdentityRef, MatchOutcome};
pub use pipeline::source::{
    FrameSource, ImageSequenceSource, MemoryFrameSource, SourceGuard,
};
pub use pipeline::video::{
    CancelFlag, FirstSighting, FramePreview, PreviewControl, VideoDetection, VideoOptions,
    VideoPipeline,
};
pub use pipeline::{FaceMatch, FramePipeline, ImageDetection};
pub use provider::{
    EmbeddingProvider, FaceBox, FaceDetection, MockEmbeddingProvider, ObjectBox,
    ObjectDetection, ObjectProvider, ProviderConfig, ProviderFactory,
};
pub use registry::{FaceRegistry, RebuildReport, SkippedReference, UNKNOWN_LABEL};

#[cfg(feature = "ffmpeg")]
pub use pipeline::source::FfmpegFrameSource;

#[cfg(feature = "remote")]
pub use provider::RemoteProviderConfig;
