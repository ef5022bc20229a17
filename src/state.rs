use std::sync::Arc;

use crate::chunker::{HfTokenEncoder, TokenChunker};
use crate::config::{Config, QDRANT_COLLECTION};
use crate::core::errors::RagError;
use crate::core::metrics::Metrics;
use crate::embedding::{Embedder, OnnxEmbedder};
use crate::history::ConversationStore;
use crate::ingest::IngestionPipeline;
use crate::llm::{GenerationClient, OpenAiClient};
use crate::query::QueryPipeline;
use crate::vector::{QdrantRetrieval, RetrievalClient};

/// Shared application state: every collaborator is constructed here once and
/// handed to the pipelines explicitly, with its lifetime tied to the process.
pub struct AppState {
    pub config: Config,
    pub metrics: Arc<Metrics>,
    pub store: ConversationStore,
    pub retrieval: Arc<dyn RetrievalClient>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn GenerationClient>,
    pub query: QueryPipeline,
    pub ingestion: Arc<IngestionPipeline>,
}

impl AppState {
    /// Bring up stores and clients. Collection setup is idempotent, so a
    /// restart against an existing index is a no-op.
    pub async fn initialize(config: Config) -> Result<Arc<Self>, RagError> {
        let metrics = Arc::new(Metrics::new()?);

        let store = ConversationStore::new(&config.db_path).await?;

        let onnx = OnnxEmbedder::load(&config.embedding_model_dir)?;
        let encoder = Arc::new(HfTokenEncoder::new(onnx.tokenizer()));
        let embedder: Arc<dyn Embedder> = Arc::new(onnx);

        let retrieval: Arc<dyn RetrievalClient> = Arc::new(QdrantRetrieval::new(
            config.qdrant_url.clone(),
            QDRANT_COLLECTION.to_string(),
        ));
        retrieval.ensure_collection(embedder.dimension()).await?;

        let chunker = Arc::new(TokenChunker::new(
            encoder,
            config.chunk_size_tokens,
            config.chunk_overlap_tokens,
        )?);

        let llm: Arc<dyn GenerationClient> = Arc::new(OpenAiClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
            config.llm_model.clone(),
        ));

        let ingestion = Arc::new(IngestionPipeline::new(
            chunker,
            embedder.clone(),
            retrieval.clone(),
            metrics.clone(),
        ));

        let query = QueryPipeline::new(
            store.clone(),
            retrieval.clone(),
            embedder.clone(),
            llm.clone(),
            metrics.clone(),
        );

        Ok(Arc::new(AppState {
            config,
            metrics,
            store,
            retrieval,
            embedder,
            llm,
            query,
            ingestion,
        }))
    }
}
