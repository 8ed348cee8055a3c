//! Embedding providers and vector math.
//!
//! [`HashEmbeddingProvider`] is the deterministic default used by tests and the
//! local pipeline. [`FallbackEmbeddingProvider`] wraps any provider so a failing
//! call degrades to the zero vector, which search treats as "unembedded".

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

/// Default dimensionality shared by every store in this workspace.
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// Only this many leading tokens contribute to a hash embedding.
const MAX_HASHED_TOKENS: usize = 100;

/// A provider that generates vector embeddings from text input.
///
/// The default [`embed_batch`](EmbeddingProvider::embed_batch) implementation
/// calls [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use pcaf_rag::{EmbeddingProvider, HashEmbeddingProvider};
///
/// let provider = HashEmbeddingProvider::default();
/// let embedding = provider.embed("electric vehicle loan").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Deterministic bag-of-words embedding.
///
/// Each lower-cased whitespace token is hashed into one of `dimensions` buckets
/// and contributes `1 / sqrt(token_count)`. The result is L2-normalized; text
/// without tokens yields the zero vector.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    /// Synchronous form of [`EmbeddingProvider::embed`]; never fails.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        if tokens.is_empty() {
            return vector;
        }

        let weight = 1.0 / (tokens.len() as f32).sqrt();
        for token in tokens.iter().take(MAX_HASHED_TOKENS) {
            let bucket = (i64::from(token_hash(token)).unsigned_abs() as usize) % self.dimensions;
            vector[bucket] += weight;
        }

        normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// 31-multiplier rolling hash over UTF-16 code units, wrapped to 32 bits.
fn token_hash(token: &str) -> i32 {
    token.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(unit))
    })
}

/// Wraps a provider so that any error yields the zero vector instead.
pub struct FallbackEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
}

impl FallbackEmbeddingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.inner.embed(text).await {
            Ok(vector) => Ok(vector),
            Err(e) => {
                warn!(error = %e, "embedding failed, using zero vector");
                Ok(vec![0.0; self.inner.dimensions()])
            }
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        match self.inner.embed_batch(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(e) => {
                warn!(
                    error = %e,
                    batch_size = texts.len(),
                    "batch embedding failed, using zero vectors"
                );
                Ok(vec![vec![0.0; self.inner.dimensions()]; texts.len()])
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for vectors of different length, empty vectors, or when either
/// has zero magnitude. The result is clamped to `[-1, 1]` to absorb rounding.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
