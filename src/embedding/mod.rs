//! Embedding capability: text in, fixed-dimension vector out.

mod onnx;

pub use onnx::OnnxEmbedder;

use async_trait::async_trait;

use crate::core::errors::RagError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Output vector width. Every `embed` result has exactly this length.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
}
