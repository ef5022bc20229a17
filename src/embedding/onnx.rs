//! Local sentence embeddings via ONNX Runtime.
//!
//! Runs the all-MiniLM-L6-v2 sentence transformer: BERT tokenization,
//! token-level inference, attention-weighted mean pooling, L2 normalization.
//! Inference is synchronous ONNX work and runs on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::{Array2, Axis};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tokenizers::{Tokenizer, TruncationParams};

use super::Embedder;
use crate::core::errors::RagError;

const EMBEDDING_DIMENSION: usize = 384;
const MAX_SEQUENCE_LENGTH: usize = 256;

pub struct OnnxEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimension: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, RagError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            return Err(RagError::Config(format!(
                "embedding model not found: {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(RagError::Config(format!(
                "tokenizer not found: {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(RagError::internal)?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(RagError::internal)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(RagError::internal)?
            .with_intra_threads(4)
            .map_err(RagError::internal)?
            .commit_from_file(&model_path)
            .map_err(RagError::internal)?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| RagError::Config(format!("failed to load tokenizer: {}", e)))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(RagError::internal)?;

        tracing::info!("embedding model loaded from {}", model_dir.display());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimension: EMBEDDING_DIMENSION,
        })
    }

    /// Tokenizer handle, shared with the chunker so both use the same
    /// token boundaries.
    pub fn tokenizer(&self) -> Arc<Tokenizer> {
        self.tokenizer.clone()
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let session = self.session.clone();
        let tokenizer = self.tokenizer.clone();
        let dimension = self.dimension;
        let text = text.to_string();

        tokio::task::spawn_blocking(move || embed_blocking(&session, &tokenizer, &text, dimension))
            .await
            .map_err(RagError::internal)?
    }
}

fn embed_blocking(
    session: &Mutex<Session>,
    tokenizer: &Tokenizer,
    text: &str,
    dimension: usize,
) -> Result<Vec<f32>, RagError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(RagError::internal)?;

    let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&m| m as i64)
        .collect();
    let token_type_ids = vec![0i64; input_ids.len()];
    let mask_for_pooling = attention_mask.clone();

    let seq_len = input_ids.len();
    let input_ids_array =
        Array2::from_shape_vec((1, seq_len), input_ids).map_err(RagError::internal)?;
    let attention_mask_array =
        Array2::from_shape_vec((1, seq_len), attention_mask).map_err(RagError::internal)?;
    let token_type_ids_array =
        Array2::from_shape_vec((1, seq_len), token_type_ids).map_err(RagError::internal)?;

    let mut session_guard = session
        .lock()
        .map_err(|_| RagError::Internal("embedding session poisoned".to_string()))?;
    let outputs = session_guard
        .run(ort::inputs![
            "input_ids" => Value::from_array(input_ids_array).map_err(RagError::internal)?,
            "attention_mask" => Value::from_array(attention_mask_array).map_err(RagError::internal)?,
            "token_type_ids" => Value::from_array(token_type_ids_array).map_err(RagError::internal)?
        ])
        .map_err(RagError::internal)?;

    // Token-level output [batch, seq_len, hidden]; pool to a sentence vector.
    let output = outputs[0]
        .try_extract_array::<f32>()
        .map_err(RagError::internal)?;
    let token_embeddings = output.index_axis(Axis(0), 0);

    let hidden = token_embeddings.shape()[1];
    if hidden != dimension {
        return Err(RagError::Internal(format!(
            "unexpected embedding dimension: {} (expected {})",
            hidden, dimension
        )));
    }

    let mut pooled = vec![0.0f32; hidden];
    let mut mask_sum = 0.0f32;
    for (i, &mask) in mask_for_pooling.iter().enumerate().take(token_embeddings.shape()[0]) {
        let weight = mask as f32;
        mask_sum += weight;
        for (j, value) in pooled.iter_mut().enumerate() {
            *value += token_embeddings[[i, j]] * weight;
        }
    }
    for value in &mut pooled {
        *value /= mask_sum.max(1e-9);
    }

    l2_normalize(&mut pooled);
    Ok(pooled)
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn load_rejects_missing_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmbedder::load(dir.path()).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }
}
