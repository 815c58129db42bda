//! Embedding-similarity primitives and the seams the orchestrator retrieves through.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{ApplicationError, CapabilityError};

/// One stored document: an embedding plus its source text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub embedding: Vec<f32>,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl VectorRecord {
    pub fn new(embedding: Vec<f32>, text: impl Into<String>) -> Self {
        Self { embedding, text: text.into(), metadata: BTreeMap::new() }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// Cosine similarity in `[-1, 1]`. Returns 0 when either vector has zero
/// magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let magnitude = norm_a.sqrt() * norm_b.sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }
    (dot / magnitude).clamp(-1.0, 1.0) as f32
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError>;
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Texts of the `top_k` most similar documents, most similar first.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, ApplicationError>;

    /// Whether queries still go to the remote index.
    fn remote_active(&self) -> bool;
}
