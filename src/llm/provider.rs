use async_trait::async_trait;

use super::types::ChatMessage;
use crate::core::errors::RagError;

/// Stateless chat completion over an ordered message sequence.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, RagError>;
}
