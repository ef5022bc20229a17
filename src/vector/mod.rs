//! Retrieval client abstraction over the vector index.

mod qdrant;

pub use qdrant::QdrantRetrieval;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::errors::RagError;

/// A chunk ready for storage: embedding vector plus citation payload.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub text: String,
    pub source: String,
    pub page: Option<u32>,
    pub ordinal: usize,
}

/// One nearest-neighbor result. Ephemeral, produced per query.
#[derive(Debug, Clone)]
pub struct RetrievalMatch {
    pub source: String,
    pub page: Option<u32>,
    pub text: String,
    /// The store's native similarity score; absent scores are coerced to 0.0.
    pub score: f32,
}

/// Thin contract over a similarity-search store.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Create the collection if missing. Calling this twice has the same
    /// observable effect as calling it once.
    async fn ensure_collection(&self, dimension: usize) -> Result<(), RagError>;

    /// Store a batch of chunks. Re-upserting the same document appends new
    /// points; deduplication is not this layer's concern.
    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<(), RagError>;

    /// Nearest neighbors for `vector`, best-first.
    async fn search(&self, vector: &[f32], limit: usize)
        -> Result<Vec<RetrievalMatch>, RagError>;
}
