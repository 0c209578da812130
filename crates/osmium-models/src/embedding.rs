//! Deterministic feature-hashing embedder.
//!
//! Maps word unigrams and bigrams into a fixed number of signed buckets and
//! L2-normalizes the result. No network, no model files, identical output for
//! identical input across processes.

use async_trait::async_trait;
use osmium_abstraction::{Embedder, EmbeddingError};
use sha2::{Digest, Sha256};

/// Default vector length.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Feature-hashing embedder for offline runs and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
    id: String,
}

impl HashEmbedder {
    /// Creates an embedder producing vectors of `dimensions` length.
    ///
    /// # Errors
    /// Returns an error if `dimensions` is zero.
    pub fn new(dimensions: usize) -> Result<Self, EmbeddingError> {
        if dimensions == 0 {
            return Err(EmbeddingError::UnsupportedProvider(
                "hash embedder needs at least one dimension".to_string(),
            ));
        }
        Ok(Self { dimensions, id: format!("hash-{dimensions}") })
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut index_bytes = [0_u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    /// Synchronous variant of [`Embedder::embed`].
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        let tokens = Self::tokens(text);

        for token in &tokens {
            let (index, sign) = self.bucket(token);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let (index, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[index] += sign * 0.5;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimensions: DEFAULT_DIMENSIONS, id: format!("hash-{DEFAULT_DIMENSIONS}") }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}
