//! Embedding capability
//!
//! Text embeddings are computed by an external model. The core depends only
//! on [`Embedder`]; outputs are not assumed deterministic, so nothing in the
//! engine compares vectors for equality.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AgentError, Result};

/// Dimension used by [`MockEmbedder::default`]
pub const MOCK_EMBEDDING_DIM: usize = 512;

/// Default deadline for one embedding call
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for generating text embeddings
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of produced vectors
    fn dimension(&self) -> usize;

    /// Model name/identifier
    fn model_name(&self) -> &str;

    /// Embed a single text string
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Embed `text`, failing with [`AgentError::Timeout`] once `limit` elapses
pub async fn embed_within(embedder: &dyn Embedder, text: &str, limit: Option<Duration>) -> Result<Vec<f32>> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, embedder.embed(text))
            .await
            .map_err(|_| AgentError::Timeout {
                operation: "embedding".into(),
                millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })?,
        None => embedder.embed(text).await,
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for mismatched dimensions or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Split text into lowercase alphanumeric tokens
pub(crate) fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Hashing bag-of-words embedder for tests and offline runs.
///
/// Each token is hashed (FNV-1a) into one of `dimension` buckets and the
/// vector is L2-normalised, so texts sharing vocabulary are close and a text
/// is always at similarity 1.0 with itself.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder; a zero dimension is rejected.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(AgentError::Config("embedding dimension must be positive".into()));
        }
        Ok(Self { dimension })
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        // dimension fits in u64 on every supported target
        usize::try_from(hash % self.dimension as u64).unwrap_or(0)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimension: MOCK_EMBEDDING_DIM }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-hashing-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            embedding[self.bucket(&token)] += 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_edges() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_mock_embedder_self_similarity() {
        let embedder = MockEmbedder::default();
        let a = embedder.embed("Super Mario 64 was released in 1996").await.unwrap();
        let b = embedder.embed("Super Mario 64 was released in 1996").await.unwrap();
        assert_eq!(a.len(), MOCK_EMBEDDING_DIM);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_embedder_related_texts_are_closer() {
        let embedder = MockEmbedder::default();
        let query = embedder.embed("When was Pokemon Gold released?").await.unwrap();
        let related = embedder.embed("Pokemon Gold was released in 1999 for the Game Boy Color").await.unwrap();
        let unrelated = embedder.embed("Halo Combat Evolved shooter Xbox").await.unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(MockEmbedder::new(0).is_err());
    }
}
