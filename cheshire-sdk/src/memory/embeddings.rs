//! Text Embedders
//!
//! The vector memory stores embeddings produced by an [`Embedder`]. Two
//! implementations ship with the SDK:
//!
//! - [`HashEmbedder`]: deterministic feature hashing, no model, used in tests
//!   and as the fallback.
//! - `FastEmbedder` (feature `embeddings`): local all-MiniLM-L6-v2 inference
//!   through `fastembed`, loaded lazily on first use.

use async_trait::async_trait;

use crate::SDKResult;
#[cfg(feature = "embeddings")]
use crate::SDKError;

/// Embedding dimensions for all-MiniLM-L6-v2
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Turns text into a fixed-size vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> SDKResult<Vec<f32>>;

    /// Vector size produced by this embedder
    fn dimensions(&self) -> usize;
}

/// Compute cosine similarity between two vectors
///
/// Returns a value between -1.0 and 1.0; mismatched lengths and zero
/// vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ─────────────────────────────────────────────────────────────────────────────
// Hash Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Bag-of-words feature hashing embedder.
///
/// Texts sharing words end up close in cosine space, which is enough for
/// recall in tests and in deployments without a model.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashEmbedder {
    /// Create an embedder producing `dimensions`-sized vectors
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> SDKResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FastEmbed
// ─────────────────────────────────────────────────────────────────────────────

/// Local model embedder backed by `fastembed`
#[cfg(feature = "embeddings")]
pub struct FastEmbedder {
    model: tokio::sync::RwLock<Option<fastembed::TextEmbedding>>,
}

#[cfg(feature = "embeddings")]
impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "embeddings")]
impl FastEmbedder {
    /// Create an embedder; the model loads on first use
    pub fn new() -> Self {
        Self {
            model: tokio::sync::RwLock::new(None),
        }
    }

    async fn ensure_model(&self) -> SDKResult<()> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        if self.model.read().await.is_some() {
            return Ok(());
        }

        let mut model_guard = self.model.write().await;
        if model_guard.is_some() {
            return Ok(());
        }

        tracing::info!("Loading embedding model: all-MiniLM-L6-v2");
        let start = std::time::Instant::now();

        let mut init_options = InitOptions::default();
        init_options.model_name = EmbeddingModel::AllMiniLML6V2;
        init_options.show_download_progress = false;

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| SDKError::memory(format!("Failed to load embedding model: {}", e)))?;

        tracing::info!("Embedding model loaded in {:?}", start.elapsed());
        *model_guard = Some(model);
        Ok(())
    }
}

#[cfg(feature = "embeddings")]
#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> SDKResult<Vec<f32>> {
        self.ensure_model().await?;

        let model_guard = self.model.read().await;
        let model = model_guard
            .as_ref()
            .ok_or_else(|| SDKError::memory("Embedding model not initialized"))?;

        model
            .embed(vec![text], None)
            .map_err(|e| SDKError::memory(format!("Failed to generate embedding: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| SDKError::memory("No embedding generated"))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!((sim - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_mismatched() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.001);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("Book a flight to Rome").await.unwrap();
        let b = embedder.embed("book a FLIGHT to rome").await.unwrap();

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_hash_embedder_related_texts_score_higher() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed("flight to rome").await.unwrap();
        let related = embedder.embed("I booked a flight to rome").await.unwrap();
        let unrelated = embedder.embed("the cat sat on the mat").await.unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::new(8);
        let v = embedder.embed("  ...  ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[cfg(feature = "embeddings")]
    #[tokio::test]
    #[ignore = "requires model download (~90MB)"]
    async fn test_fastembed_dimensions() {
        let embedder = FastEmbedder::new();
        let vector = embedder.embed("hello world").await.unwrap();
        assert_eq!(vector.len(), EMBEDDING_DIMENSIONS);
    }
}
