//! Token-aware document chunking.
//!
//! Splits document text into overlapping windows measured in tokens rather
//! than characters, so chunk sizes line up with the embedding model's input
//! window.

use std::sync::Arc;

use tokenizers::Tokenizer;

use crate::core::errors::RagError;

/// A bounded span of a source document, the unit of retrieval.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub text: String,
    pub source_id: String,
    pub page: Option<u32>,
    pub ordinal: usize,
    /// Token length of `text` measured by re-encoding the decoded span.
    /// Advisory only: decode/encode round-trips may shift it slightly from
    /// the window width.
    pub token_count: usize,
}

/// Encode/decode seam over the tokenizer scheme.
pub trait TokenEncoder: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, RagError>;
    fn decode(&self, tokens: &[u32]) -> Result<String, RagError>;
}

/// `TokenEncoder` over a HuggingFace tokenizer, shared with the embedding
/// model so both sides agree on token boundaries.
pub struct HfTokenEncoder {
    inner: Arc<Tokenizer>,
}

impl HfTokenEncoder {
    pub fn new(inner: Arc<Tokenizer>) -> Self {
        Self { inner }
    }
}

impl TokenEncoder for HfTokenEncoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>, RagError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(RagError::internal)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, RagError> {
        self.inner.decode(tokens, true).map_err(RagError::internal)
    }
}

/// Deterministic sliding-window splitter.
///
/// Windows are `chunk_size` tokens wide and advance by `chunk_size - overlap`
/// tokens, so consecutive chunks share `overlap` tokens of context.
pub struct TokenChunker {
    encoder: Arc<dyn TokenEncoder>,
    chunk_size: usize,
    overlap: usize,
}

impl TokenChunker {
    /// Fails fast on window parameters that could never terminate:
    /// `chunk_size` must be positive and strictly greater than `overlap`.
    pub fn new(
        encoder: Arc<dyn TokenEncoder>,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::Config(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, chunk_size
            )));
        }

        Ok(Self {
            encoder,
            chunk_size,
            overlap,
        })
    }

    /// Split `text` into ordered chunks carrying the source metadata.
    ///
    /// Empty input yields an empty sequence. The final window is emitted
    /// exactly once, when `end` reaches the token sequence length.
    pub fn split(
        &self,
        text: &str,
        source_id: &str,
        page: Option<u32>,
    ) -> Result<Vec<DocumentChunk>, RagError> {
        let tokens = self.encoder.encode(text)?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut ordinal = 0usize;

        loop {
            let end = (start + self.chunk_size).min(tokens.len());
            let chunk_text = self.encoder.decode(&tokens[start..end])?;
            let token_count = self.encoder.encode(&chunk_text)?.len();

            chunks.push(DocumentChunk {
                text: chunk_text,
                source_id: source_id.to_string(),
                page,
                ordinal,
                token_count,
            });

            if end == tokens.len() {
                break;
            }

            start = end - self.overlap;
            ordinal += 1;
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Character-level codec: one token per char. Keeps the window algebra
    /// exact so coverage properties can be asserted literally.
    struct CharEncoder;

    impl TokenEncoder for CharEncoder {
        fn encode(&self, text: &str) -> Result<Vec<u32>, RagError> {
            Ok(text.chars().map(u32::from).collect())
        }

        fn decode(&self, tokens: &[u32]) -> Result<String, RagError> {
            tokens
                .iter()
                .map(|&t| char::from_u32(t).ok_or_else(|| RagError::internal("bad token")))
                .collect()
        }
    }

    fn chunker(size: usize, overlap: usize) -> TokenChunker {
        TokenChunker::new(Arc::new(CharEncoder), size, overlap).unwrap()
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(TokenChunker::new(Arc::new(CharEncoder), 4, 4).is_err());
        assert!(TokenChunker::new(Arc::new(CharEncoder), 4, 9).is_err());
        assert!(TokenChunker::new(Arc::new(CharEncoder), 0, 0).is_err());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunker(4, 1).split("", "doc.txt", None).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunker(256, 100)
            .split("Acme policy: refunds within 30 days.", "policy.txt", None)
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].source_id, "policy.txt");
        assert_eq!(chunks[0].text, "Acme policy: refunds within 30 days.");
        assert_eq!(chunks[0].token_count, chunks[0].text.chars().count());
    }

    #[test]
    fn windows_cover_the_full_sequence_with_overlap() {
        let text = "abcdefghij"; // 10 tokens
        let chunks = chunker(4, 1).split(text, "doc", None).unwrap();

        // starts advance by size - overlap = 3: [0,4) [3,7) [6,10)
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
        assert_eq!(
            chunks.iter().map(|c| c.ordinal).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        // Dropping the leading overlap of every later chunk reconstructs the
        // original token sequence with no gaps.
        let mut rebuilt = chunks[0].text.clone();
        for chunk in &chunks[1..] {
            rebuilt.push_str(&chunk.text[1..]);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn terminates_when_end_lands_exactly_on_len() {
        let chunks = chunker(4, 1).split("abcd", "doc", None).unwrap();
        assert_eq!(chunks.len(), 1);

        // 7 tokens, starts 0 and 3; second window ends exactly at len.
        let chunks = chunker(4, 1).split("abcdefg", "doc", None).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "defg");
    }

    #[test]
    fn page_metadata_propagates_to_every_chunk() {
        let chunks = chunker(4, 1).split("abcdefghij", "doc.pdf", Some(3)).unwrap();
        assert!(chunks.iter().all(|c| c.page == Some(3)));
        assert!(chunks.iter().all(|c| c.source_id == "doc.pdf"));
    }
}
