//! Draft generation from a playbook snapshot.
//!
//! The generator retrieves the items most relevant to the requirements, asks
//! the model for a schema-typed draft and records which items the draft relied
//! on. It has no side effects beyond the model call; snapshots are immutable,
//! so any number of generators can run against the same one concurrently.

mod prompt;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use osmium_abstraction::{Model, ModelParameters};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::coercion::ExpectedShape;
use crate::completion::{CompletionError, StructuredRequest, complete_structured};
use crate::playbook::{KnowledgeItem, Playbook, PlaybookError, PlaybookIndex};

pub use prompt::retrieval_query;

/// Default number of items retrieved per generation.
pub const DEFAULT_MAX_ITEMS: usize = 50;

/// Errors from draft generation.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Playbook items could not be ranked.
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] PlaybookError),

    /// The model produced no usable draft.
    #[error("Draft generation failed: {0}")]
    Completion(#[from] CompletionError),
}

impl GenerationError {
    /// Raw model text of the failed draft, if the model replied.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Self::Retrieval(_) => None,
            Self::Completion(e) => e.raw_text(),
        }
    }
}

/// Generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Items retrieved per call.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Reply token budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call deadline in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: None,
        }
    }
}

/// Record of one generation, consumed by the reflector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// The generated artifact.
    pub draft: Value,
    /// Retrieved items the model cited, in citation order.
    pub item_ids_used: Vec<String>,
    /// The model's account of how it built the draft.
    pub reasoning_trace: String,
    /// Items shown to the model, most relevant first.
    pub retrieved: Vec<KnowledgeItem>,
    /// Playbook version the draft was generated against.
    pub playbook_version: u64,
}

impl Trajectory {
    /// Items the draft relied on.
    pub fn items_used(&self) -> impl Iterator<Item = &KnowledgeItem> {
        self.retrieved.iter().filter(|item| self.item_ids_used.contains(&item.id))
    }
}

#[derive(Debug, Deserialize)]
struct GeneratorReply {
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    bullet_ids: Vec<String>,
    draft: Value,
}

/// Produces drafts from playbook snapshots.
pub struct Generator {
    model: Arc<dyn Model>,
    index: Arc<PlaybookIndex>,
    config: GeneratorConfig,
    draft_schema: Value,
}

impl Generator {
    /// Creates a generator whose drafts are JSON objects.
    pub fn new(model: Arc<dyn Model>, index: Arc<PlaybookIndex>, config: GeneratorConfig) -> Self {
        Self { model, index, config, draft_schema: json!({"type": "object"}) }
    }

    /// Requests drafts matching `schema` instead of any object.
    #[must_use]
    pub fn with_draft_schema(mut self, schema: Value) -> Self {
        self.draft_schema = schema;
        self
    }

    /// Current settings.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generates a draft using the configured number of items.
    ///
    /// # Errors
    /// Returns `GenerationError` when retrieval fails or the model output
    /// cannot be used; the error carries the raw model text when available.
    pub async fn generate(
        &self,
        requirements: &BTreeMap<String, Value>,
        templates: &[Value],
        playbook: &Playbook,
    ) -> Result<Trajectory, GenerationError> {
        self.generate_with_limit(requirements, templates, playbook, self.config.max_items).await
    }

    /// Generates a draft from at most `max_items` retrieved items.
    ///
    /// # Errors
    /// See [`Generator::generate`].
    pub async fn generate_with_limit(
        &self,
        requirements: &BTreeMap<String, Value>,
        templates: &[Value],
        playbook: &Playbook,
        max_items: usize,
    ) -> Result<Trajectory, GenerationError> {
        let query = retrieval_query(requirements, templates);
        let query_embedding = self.index.embed_text(&query).await?;
        let retrieved = self.index.retrieve(playbook, &query_embedding, max_items, None).await?;

        debug!(
            playbook_version = playbook.version(),
            retrieved = retrieved.len(),
            max_items,
            "Retrieved playbook items"
        );

        let request = StructuredRequest {
            messages: prompt::build_messages(requirements, templates, playbook, &retrieved),
            schema: prompt::reply_schema(&self.draft_schema),
            shape: ExpectedShape::object(),
            parameters: ModelParameters {
                temperature: Some(self.config.temperature),
                max_tokens: Some(self.config.max_tokens),
                ..ModelParameters::default()
            },
            timeout: self.config.timeout_ms.map(Duration::from_millis),
        };

        let reply = complete_structured::<GeneratorReply>(self.model.as_ref(), request).await?;
        let GeneratorReply { reasoning, bullet_ids, draft } = reply.value;

        let item_ids_used = cited_ids(bullet_ids, &retrieved);
        info!(
            playbook_version = playbook.version(),
            retrieved = retrieved.len(),
            cited = item_ids_used.len(),
            "Generated draft"
        );

        Ok(Trajectory {
            draft: decode_draft(draft),
            item_ids_used,
            reasoning_trace: reasoning,
            retrieved,
            playbook_version: playbook.version(),
        })
    }
}

/// Cited ids that were actually retrieved, deduplicated, in citation order.
fn cited_ids(cited: Vec<String>, retrieved: &[KnowledgeItem]) -> Vec<String> {
    let known: HashSet<&str> = retrieved.iter().map(|item| item.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut used = Vec::new();

    for id in cited {
        let id = id.trim().trim_matches(|c| c == '[' || c == ']').to_string();
        if !known.contains(id.as_str()) {
            debug!(item_id = %id, "Dropping citation of unretrieved item");
            continue;
        }
        if seen.insert(id.clone()) {
            used.push(id);
        }
    }
    used
}

/// Parses a draft that arrived as a JSON-encoded string.
fn decode_draft(draft: Value) -> Value {
    if let Value::String(text) = &draft {
        if let Ok(inner) = serde_json::from_str::<Value>(text.trim()) {
            if inner.is_object() || inner.is_array() {
                return inner;
            }
        }
    }
    draft
}
