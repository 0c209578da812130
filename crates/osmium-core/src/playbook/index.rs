//! Similarity ranking over playbook items.
//!
//! Item embeddings are cached by id together with a digest of the content they
//! were computed from. A cached vector is reused until the item's content
//! changes, so count-only updates never trigger re-embedding.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use osmium_abstraction::Embedder;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::error::Result;
use super::types::{KnowledgeItem, Playbook};

#[derive(Debug, Clone)]
struct CachedEmbedding {
    digest: [u8; 32],
    vector: Arc<Vec<f32>>,
}

/// An item together with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    /// The ranked item.
    pub item: KnowledgeItem,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

/// Embedding-backed retrieval index shared by the generator and curator.
pub struct PlaybookIndex {
    embedder: Arc<dyn Embedder>,
    cache: RwLock<HashMap<String, CachedEmbedding>>,
}

impl std::fmt::Debug for PlaybookIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybookIndex")
            .field("embedder", &self.embedder.model_id())
            .field("cached", &self.cached_len())
            .finish()
    }
}

impl PlaybookIndex {
    /// Creates an index backed by `embedder`.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder, cache: RwLock::new(HashMap::new()) }
    }

    /// Embeds arbitrary text without caching.
    ///
    /// # Errors
    /// Returns `PlaybookError::Embedding` if the embedding service fails.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embedder.embed(text).await?)
    }

    /// Returns the embedding for `item`, computing it only if the content
    /// changed since it was last cached.
    ///
    /// # Errors
    /// Returns `PlaybookError::Embedding` if the embedding service fails.
    pub async fn embed_item(&self, item: &KnowledgeItem) -> Result<Arc<Vec<f32>>> {
        let digest = content_digest(&item.content);

        {
            let cache = self.cache.read().expect("Embedding cache lock poisoned");
            if let Some(cached) = cache.get(&item.id) {
                if cached.digest == digest {
                    return Ok(Arc::clone(&cached.vector));
                }
            }
        }

        debug!(item_id = %item.id, "Embedding item content");
        let vector = Arc::new(self.embedder.embed(&item.content).await?);

        let mut cache = self.cache.write().expect("Embedding cache lock poisoned");
        cache.insert(item.id.clone(), CachedEmbedding { digest, vector: Arc::clone(&vector) });
        Ok(vector)
    }

    /// Ranks the playbook's items by similarity to `query_embedding`.
    ///
    /// Ties keep playbook order. `top_k == 0` yields nothing.
    ///
    /// # Errors
    /// Returns `PlaybookError::Embedding` if an item cannot be embedded.
    pub async fn rank(
        &self,
        playbook: &Playbook,
        query_embedding: &[f32],
        top_k: usize,
        section: Option<&str>,
    ) -> Result<Vec<ScoredItem>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = Vec::new();
        for item in playbook.items() {
            if section.is_some_and(|s| s != item.section) {
                continue;
            }
            let vector = self.embed_item(item).await?;
            let similarity = cosine_similarity(query_embedding, &vector).unwrap_or(0.0);
            scored.push(ScoredItem { item: item.clone(), similarity });
        }

        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Top-`k` items most similar to `query_embedding`, most similar first.
    ///
    /// # Errors
    /// Returns `PlaybookError::Embedding` if an item cannot be embedded.
    pub async fn retrieve(
        &self,
        playbook: &Playbook,
        query_embedding: &[f32],
        top_k: usize,
        section: Option<&str>,
    ) -> Result<Vec<KnowledgeItem>> {
        let ranked = self.rank(playbook, query_embedding, top_k, section).await?;
        Ok(ranked.into_iter().map(|scored| scored.item).collect())
    }

    /// Drops the cached embedding for `id`.
    pub fn invalidate(&self, id: &str) {
        self.cache.write().expect("Embedding cache lock poisoned").remove(id);
    }

    /// Drops cached embeddings for items no longer in `playbook`.
    pub fn retain(&self, playbook: &Playbook) {
        let mut cache = self.cache.write().expect("Embedding cache lock poisoned");
        let before = cache.len();
        cache.retain(|id, _| playbook.contains(id));
        let dropped = before - cache.len();
        if dropped > 0 {
            debug!(dropped, version = playbook.version(), "Pruned embedding cache");
        }
    }

    /// Number of cached item embeddings.
    pub fn cached_len(&self) -> usize {
        self.cache.read().expect("Embedding cache lock poisoned").len()
    }
}

fn content_digest(content: &str) -> [u8; 32] {
    Sha256::digest(content.as_bytes()).into()
}

/// Cosine similarity between two vectors.
///
/// Returns `None` for mismatched lengths or zero-magnitude input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}
