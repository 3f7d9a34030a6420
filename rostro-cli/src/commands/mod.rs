//! Subcommand implementations and the state they share.

pub mod detect_image;
pub mod detect_video;
pub mod face;
pub mod individual;
pub mod rebuild;

use std::sync::Arc;

use anyhow::{Context, Result};
use rostro_core::{
    EmbeddingProvider, FaceRegistry, FramePipeline, IdentityMatcher, LocalCatalog,
    ObjectProvider, ProviderConfig, ProviderFactory, RecognitionConfig, ReferenceIndex,
    RemoteProviderConfig,
};
use tracing::{debug, warn};

use crate::Cli;

/// Process-scoped state: configuration, catalog, index and providers.
pub struct AppContext {
    pub config: RecognitionConfig,
    pub catalog: Arc<LocalCatalog>,
    pub index: Arc<ReferenceIndex>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub objects: Option<Arc<dyn ObjectProvider>>,
    pub registry: FaceRegistry,
}

impl AppContext {
    /// Environment first, then command-line overrides, then one validation pass.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = RecognitionConfig::from_env();
        if let Some(dir) = &cli.data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(threshold) = cli.threshold {
            config.match_threshold = threshold;
        }
        config.validate().context("Invalid configuration")?;
        debug!(?config, "Configuration loaded");

        let embedding_config = match (&cli.provider_url, cli.mock) {
            (Some(url), false) => {
                ProviderConfig::Remote(RemoteProviderConfig::new(url).with_env_api_key())
            }
            (Some(_), true) => {
                warn!("--mock given, ignoring the embedding service URL");
                ProviderConfig::Mock
            }
            (None, _) => ProviderConfig::Mock,
        };
        let object_config = cli
            .object_provider_url
            .as_ref()
            .map(|url| ProviderConfig::Remote(RemoteProviderConfig::new(url).with_env_api_key()));

        let embedder = ProviderFactory::create_embedding(embedding_config)
            .context("Failed to create embedding provider")?;
        let objects = ProviderFactory::create_objects(object_config)
            .context("Failed to create object provider")?;

        let catalog = Arc::new(LocalCatalog::open(&config.catalog_path).with_context(|| {
            format!("Failed to open catalog: {}", config.catalog_path.display())
        })?);
        let index = Arc::new(ReferenceIndex::new());
        let registry = FaceRegistry::new(
            catalog.clone(),
            index.clone(),
            embedder.clone(),
            config.reference_dir.clone(),
        );

        Ok(Self {
            config,
            catalog,
            index,
            embedder,
            objects,
            registry,
        })
    }

    /// Load the index from the catalog. Called by every detection command.
    pub fn load_index(&self) -> Result<()> {
        let report = self
            .registry
            .rebuild_index()
            .context("Failed to build reference index")?;
        if !report.skipped.is_empty() {
            warn!(
                skipped = report.skipped.len(),
                "Some references were left out of the index"
            );
        }
        Ok(())
    }

    pub fn frame_pipeline(&self) -> FramePipeline {
        FramePipeline::new(
            self.embedder.clone(),
            self.objects.clone(),
            IdentityMatcher::new(self.index.clone(), self.config.match_threshold),
        )
    }
}
