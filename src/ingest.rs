//! Ingestion pipeline: load, chunk, embed, upsert.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::chunker::{DocumentChunk, TokenChunker};
use crate::core::errors::RagError;
use crate::core::metrics::Metrics;
use crate::embedding::Embedder;
use crate::loader;
use crate::vector::{ChunkPoint, RetrievalClient};

pub struct IngestionPipeline {
    chunker: Arc<TokenChunker>,
    embedder: Arc<dyn Embedder>,
    retrieval: Arc<dyn RetrievalClient>,
    metrics: Arc<Metrics>,
}

impl IngestionPipeline {
    pub fn new(
        chunker: Arc<TokenChunker>,
        embedder: Arc<dyn Embedder>,
        retrieval: Arc<dyn RetrievalClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            retrieval,
            metrics,
        }
    }

    /// Process one uploaded file end to end. Failures are classified but the
    /// pipeline never retries internally; redelivery policy belongs to the
    /// broker. Re-ingesting the same file appends duplicate points.
    pub async fn ingest(&self, file_path: &str) -> Result<(), RagError> {
        match self.ingest_inner(file_path).await {
            Ok(chunk_count) => {
                self.metrics
                    .documents_processed
                    .with_label_values(&["success"])
                    .inc();
                tracing::info!("ingested {} ({} chunks)", file_path, chunk_count);
                Ok(())
            }
            Err(err) => {
                self.metrics
                    .documents_processed
                    .with_label_values(&[err.outcome_label()])
                    .inc();
                Err(err)
            }
        }
    }

    async fn ingest_inner(&self, file_path: &str) -> Result<usize, RagError> {
        let path = PathBuf::from(file_path);
        if !path.exists() {
            return Err(RagError::NotFound(file_path.to_string()));
        }
        if !loader::is_supported(&path) {
            let ext = loader::extension_of(&path).unwrap_or_default();
            return Err(RagError::UnsupportedFormat(ext));
        }

        // Parsing and chunking are CPU/file bound; keep them off the
        // async workers.
        let chunker = self.chunker.clone();
        let chunks = tokio::task::spawn_blocking(move || load_and_chunk(&chunker, &path))
            .await
            .map_err(RagError::internal)??;

        if chunks.is_empty() {
            return Ok(0);
        }

        let mut points = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = self
                .embedder
                .embed(&chunk.text)
                .await
                .map_err(RagError::processing)?;
            points.push(ChunkPoint {
                id: Uuid::new_v4(),
                vector,
                text: chunk.text.clone(),
                source: chunk.source_id.clone(),
                page: chunk.page,
                ordinal: chunk.ordinal,
            });
        }

        let count = points.len();
        self.retrieval
            .upsert(points)
            .await
            .map_err(RagError::processing)?;

        Ok(count)
    }
}

fn load_and_chunk(chunker: &TokenChunker, path: &Path) -> Result<Vec<DocumentChunk>, RagError> {
    let units = loader::load_document(path)?;

    let mut chunks = Vec::new();
    for unit in &units {
        chunks.extend(chunker.split(&unit.text, &unit.source, unit.page)?);
    }
    Ok(chunks)
}
