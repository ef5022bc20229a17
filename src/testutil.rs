//! In-process test doubles for the external collaborators.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::chunker::{TokenChunker, TokenEncoder};
use crate::core::errors::RagError;
use crate::embedding::Embedder;
use crate::llm::{ChatMessage, GenerationClient};
use crate::vector::{ChunkPoint, RetrievalClient, RetrievalMatch};

/// One token per character; keeps chunk arithmetic exact in tests.
pub struct CharEncoder;

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

pub fn test_chunker(chunk_size: usize, overlap: usize) -> TokenChunker {
    TokenChunker::new(Arc::new(CharEncoder), chunk_size, overlap).unwrap()
}

/// Deterministic hash-seeded embeddings with non-negative components, so any
/// two vectors score a positive cosine similarity and equal text scores
/// highest. No real model needed.
pub struct StubEmbedder {
    dimension: usize,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        let mut vector = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223) ^ (i as u64);
            vector.push((seed as f64 / u64::MAX as f64) as f32);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

/// Embedder that always fails; exercises the query pipeline's degradation.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
        Err(RagError::Internal("embedding backend down".to_string()))
    }
}

/// Brute-force in-memory stand-in for the vector index.
pub struct InMemoryRetrieval {
    points: Mutex<Vec<ChunkPoint>>,
    upsert_batches: AtomicUsize,
    collections_created: AtomicUsize,
    collection_exists: Mutex<bool>,
}

impl InMemoryRetrieval {
    pub fn new() -> Self {
        Self {
            points: Mutex::new(Vec::new()),
            upsert_batches: AtomicUsize::new(0),
            collections_created: AtomicUsize::new(0),
            collection_exists: Mutex::new(false),
        }
    }

    pub fn points(&self) -> Vec<ChunkPoint> {
        self.points.lock().unwrap().clone()
    }

    pub fn upsert_batches(&self) -> usize {
        self.upsert_batches.load(Ordering::SeqCst)
    }

    pub fn collections_created(&self) -> usize {
        self.collections_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalClient for InMemoryRetrieval {
    async fn ensure_collection(&self, _dimension: usize) -> Result<(), RagError> {
        let mut exists = self.collection_exists.lock().unwrap();
        if !*exists {
            *exists = true;
            self.collections_created.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<(), RagError> {
        self.upsert_batches.fetch_add(1, Ordering::SeqCst);
        self.points.lock().unwrap().extend(points);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievalMatch>, RagError> {
        let points = self.points.lock().unwrap();
        let mut scored: Vec<RetrievalMatch> = points
            .iter()
            .map(|p| RetrievalMatch {
                source: p.source.clone(),
                page: p.page,
                text: p.text.clone(),
                score: cosine_similarity(vector, &p.vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Canned generation client that records every message sequence it sees.
pub struct StubGeneration {
    reply: String,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl StubGeneration {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for StubGeneration {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

/// Generation client that always fails.
pub struct FailingGeneration;

#[async_trait]
impl GenerationClient for FailingGeneration {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, RagError> {
        Err(RagError::Generation("model unavailable".to_string()))
    }
}
