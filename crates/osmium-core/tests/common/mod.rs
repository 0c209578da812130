//! Shared test utilities for Osmium Core integration tests.
//!
//! Provides a deterministic table-driven embedder and helpers for building
//! scripted model replies and seeded stores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use osmium_abstraction::{Embedder, EmbeddingError, ModelError};
use osmium_core::{
    Curator, CuratorConfig, InMemoryPlaybookStore, ItemSource, KnowledgeItem, PlaybookDraft,
    PlaybookIndex,
};
use serde_json::{Value, json};

/// Embedder returning fixed vectors for known texts.
///
/// Unknown texts map onto a dedicated axis, orthogonal to every table entry.
#[derive(Debug, Clone)]
pub struct StaticEmbedder {
    dimensions: usize,
    table: HashMap<String, Vec<f32>>,
}

impl StaticEmbedder {
    /// Creates an embedder with `dimensions` axes; the last one is reserved
    /// for unknown texts.
    pub fn new(dimensions: usize) -> Self {
        assert!(dimensions >= 2, "need at least one axis plus the unknown axis");
        Self { dimensions, table: HashMap::new() }
    }

    /// Registers `vector` for `text`, zero-padded to the embedder's width.
    pub fn with(mut self, text: &str, vector: &[f32]) -> Self {
        assert!(vector.len() < self.dimensions, "vector overlaps the unknown axis");
        let mut padded = vector.to_vec();
        padded.resize(self.dimensions, 0.0);
        self.table.insert(text.to_string(), padded);
        self
    }

    /// Registers a one-hot vector on `axis` for `text`.
    pub fn with_axis(self, text: &str, axis: usize) -> Self {
        let mut vector = vec![0.0; axis + 1];
        vector[axis] = 1.0;
        self.with(text, &vector)
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(vector) = self.table.get(text) {
            return Ok(vector.clone());
        }
        let mut unknown = vec![0.0; self.dimensions];
        unknown[self.dimensions - 1] = 1.0;
        Ok(unknown)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        "static-test-embedder"
    }
}

/// Creates an index over `embedder`.
pub fn index(embedder: StaticEmbedder) -> Arc<PlaybookIndex> {
    Arc::new(PlaybookIndex::new(Arc::new(embedder)))
}

/// Creates a curator over `index` with `config`.
pub fn curator(index: &Arc<PlaybookIndex>, config: CuratorConfig) -> Curator {
    Curator::new(Arc::clone(index), config)
}

/// Seeds a store with `items` given as `(section, content, helpful, harmful)`.
pub fn seeded_store(sections: &[&str], items: &[(&str, &str, u32, u32)]) -> InMemoryPlaybookStore {
    InMemoryPlaybookStore::with_initial(seeded_draft(sections, items))
        .expect("Seed playbook should validate")
}

/// Builds a version-0 draft with `items` given as `(section, content, helpful, harmful)`.
pub fn seeded_draft(sections: &[&str], items: &[(&str, &str, u32, u32)]) -> PlaybookDraft {
    let mut draft = PlaybookDraft::new(sections.iter().copied());
    for (section, content, helpful, harmful) in items {
        let id = draft.allocate_id(section);
        draft.items.push(
            KnowledgeItem::new(id, *section, *content, ItemSource::Seed).with_counts(*helpful, *harmful),
        );
    }
    draft
}

/// A generator reply citing `bullet_ids`.
pub fn generator_reply(bullet_ids: &[&str], draft: Value) -> Result<String, ModelError> {
    Ok(json!({
        "reasoning": "Applied the cited playbook entries",
        "bullet_ids": bullet_ids,
        "draft": draft,
    })
    .to_string())
}

/// A reflector reply with `tags` given as `(id, verdict)`.
pub fn reflector_reply(
    root_cause: &str,
    key_insight: &str,
    section: &str,
    tags: &[(&str, &str)],
) -> Result<String, ModelError> {
    let bullet_tags: Vec<Value> = tags.iter().map(|(id, tag)| json!({"id": id, "tag": tag})).collect();
    Ok(json!({
        "error_identification": "The draft missed a requirement",
        "root_cause": root_cause,
        "correct_approach": "Follow the requirement explicitly",
        "key_insight": key_insight,
        "section": section,
        "bullet_tags": bullet_tags,
    })
    .to_string())
}
