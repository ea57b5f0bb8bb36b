//! Service wiring.
//!
//! [`Services`] owns every long-lived handle (document source, embedder,
//! language model, persistent index) and the pipeline assembled from them.
//! It is built once at startup and shared by reference; nothing here is
//! global.

use std::sync::Arc;

use crate::config::Config;
use crate::connector_s3::S3Source;
use crate::embedding::{create_embedder, Embedder};
use crate::generation::GenerationStage;
use crate::index::IndexOptions;
use crate::llm::{ChatCompletionsModel, LanguageModel};
use crate::persistent::PersistentIndex;
use crate::pipeline::Pipeline;
use crate::retrieval::{PersistentRetriever, RetrievalStage, UploadRetriever};
use crate::sources::DocumentSource;

pub struct Services {
    pub config: Arc<Config>,
    pub embedder: Arc<dyn Embedder>,
    pub model: Arc<dyn LanguageModel>,
    pub persistent: Arc<PersistentIndex>,
    pub pipeline: Arc<Pipeline>,
}

impl Services {
    /// Construct production services: S3 source, configured embedder,
    /// OpenAI-compatible chat model.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let source = Arc::new(S3Source::new(config.s3.clone())?);
        let embedder = create_embedder(&config.embedding)?;
        let model = Arc::new(ChatCompletionsModel::new(&config.llm)?);
        tracing::info!(
            source = %source.describe(),
            embedder = embedder.model_name(),
            llm = model.model_name(),
            "services ready"
        );
        Ok(Self::new(config.clone(), source, embedder, model))
    }

    /// Assemble services from already-built handles.
    pub fn new(
        config: Config,
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let options = index_options(&config);
        let top_k = config.retrieval.top_k;

        let persistent = Arc::new(PersistentIndex::new(
            config.storage.snapshot_dir.clone(),
            source,
            embedder.clone(),
            options.clone(),
        ));
        let retrieval = RetrievalStage::new(
            Arc::new(UploadRetriever::new(embedder.clone(), options.clone(), top_k)),
            Arc::new(PersistentRetriever::new(
                persistent.clone(),
                embedder.clone(),
                options,
                top_k,
            )),
        );
        let generation = GenerationStage::new(model.clone(), config.llm.timeout_secs);

        Self {
            config: Arc::new(config),
            embedder,
            model,
            persistent,
            pipeline: Arc::new(Pipeline::new(Arc::new(retrieval), Arc::new(generation))),
        }
    }

    /// Release service handles. Safe to call once in-flight requests have
    /// finished.
    pub fn shutdown(self) {
        tracing::info!("shutting down services");
        drop(self);
    }
}

pub fn index_options(config: &Config) -> IndexOptions {
    IndexOptions {
        max_tokens: config.chunking.max_tokens,
        batch_size: config.embedding.batch_size,
        embed_timeout_secs: config.embedding.timeout_secs,
    }
}
