mod openai;
mod provider;
mod types;

pub use openai::OpenAiClient;
pub use provider::GenerationClient;
pub use types::ChatMessage;
