//! Face embedding and object detection providers.
//!
//! The core treats feature extraction and object detection as opaque
//! capabilities behind two traits:
//!
//! - [`EmbeddingProvider`] - face boxes with fixed-dimension embeddings
//! - [`ObjectProvider`] - labelled object boxes
//!
//! ## Implementations
//!
//! - **Mock** - deterministic, model-free embeddings derived from pixel content
//! - **Scripted** - test doubles keyed on an image's top-left pixel colour
//! - **Remote** - HTTP inference service (feature `remote`)
//!
//! All calls are synchronous and CPU/IO bound. Callers running inside an async
//! runtime should dispatch them to a blocking thread.

mod mock;
#[cfg(feature = "remote")]
mod remote;
mod scripted;

pub use mock::{MockEmbeddingProvider, MOCK_EMBEDDING_DIM};
#[cfg(feature = "remote")]
pub use remote::{RemoteEmbeddingProvider, RemoteObjectProvider, RemoteProviderConfig};
pub use scripted::{frame_key, ScriptedEmbeddingProvider, ScriptedObjectProvider};

use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Face bounding box in pixel coordinates, `(top, right, bottom, left)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

impl From<[i32; 4]> for FaceBox {
    fn from([top, right, bottom, left]: [i32; 4]) -> Self {
        Self::new(top, right, bottom, left)
    }
}

/// Object bounding box in pixel coordinates, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct ObjectBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl ObjectBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<[i32; 4]> for ObjectBox {
    fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<ObjectBox> for [i32; 4] {
    fn from(b: ObjectBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One face reported by an [`EmbeddingProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub bbox: FaceBox,
    pub embedding: Vec<f32>,
}

impl FaceDetection {
    pub fn new(bbox: FaceBox, embedding: Vec<f32>) -> Self {
        Self { bbox, embedding }
    }
}

/// One object reported by an [`ObjectProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub label: String,
    pub bbox: ObjectBox,
}

impl ObjectDetection {
    pub fn new(label: impl Into<String>, bbox: ObjectBox) -> Self {
        Self {
            label: label.into(),
            bbox,
        }
    }
}

/// Face detector + feature extractor.
///
/// Implementations must be thread-safe (`Send + Sync`); one instance serves
/// every concurrent request.
pub trait EmbeddingProvider: Send + Sync {
    /// Detect faces and compute one embedding per face.
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceDetection>>;

    /// Short identifier used in logs.
    fn name(&self) -> &'static str;
}

/// Object detector.
pub trait ObjectProvider: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<ObjectDetection>>;

    fn name(&self) -> &'static str;
}

/// Configuration for creating an embedding provider.
#[derive(Debug, Clone, Default)]
pub enum ProviderConfig {
    /// Deterministic model-free provider
    #[default]
    Mock,
    /// HTTP inference service
    #[cfg(feature = "remote")]
    Remote(RemoteProviderConfig),
}

/// Factory for creating providers.
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create an embedding provider from configuration.
    pub fn create_embedding(config: ProviderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
        match config {
            ProviderConfig::Mock => {
                tracing::info!("Using mock embedding provider");
                Ok(Arc::new(MockEmbeddingProvider::new()))
            }
            #[cfg(feature = "remote")]
            ProviderConfig::Remote(remote) => {
                Ok(Arc::new(RemoteEmbeddingProvider::new(remote)?))
            }
        }
    }

    /// Create an object provider. `None` yields no provider; the pipelines
    /// then report an empty object list.
    pub fn create_objects(
        config: Option<ProviderConfig>,
    ) -> Result<Option<Arc<dyn ObjectProvider>>> {
        match config {
            None | Some(ProviderConfig::Mock) => Ok(None),
            #[cfg(feature = "remote")]
            Some(ProviderConfig::Remote(remote)) => {
                Ok(Some(Arc::new(RemoteObjectProvider::new(remote)?)))
            }
        }
    }
}
