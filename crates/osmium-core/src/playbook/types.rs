//! Playbook data model.
//!
//! A [`Playbook`] is an immutable, versioned snapshot of knowledge items.
//! Changes are staged on a [`PlaybookDraft`] and only become visible once a
//! store publishes the draft as the next version.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{PlaybookError, Result};

/// Where a knowledge item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    /// Shipped with the initial playbook.
    Seed,
    /// Derived from a reflector insight.
    Reflection,
    /// Added by an operator.
    Manual,
}

impl ItemSource {
    /// Returns the lowercase name used in statistics and persisted documents.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Reflection => "reflection",
            Self::Manual => "manual",
        }
    }
}

/// Quality metadata tracked for every knowledge item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Times the item was tagged helpful.
    pub helpful_count: u32,
    /// Times the item was tagged harmful.
    pub harmful_count: u32,
    /// When the item was first added.
    pub created_at: DateTime<Utc>,
    /// When the item's counts or content last changed.
    pub last_updated: DateTime<Utc>,
    /// Origin of the item.
    pub source: ItemSource,
}

impl ItemMetadata {
    /// Fresh metadata with zero counts.
    pub fn new(source: ItemSource) -> Self {
        let now = Utc::now();
        Self { helpful_count: 0, harmful_count: 0, created_at: now, last_updated: now, source }
    }
}

/// Atomic unit of retrievable guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Stable identifier, never reassigned.
    pub id: String,
    /// Section this item belongs to.
    pub section: String,
    /// Guidance text.
    pub content: String,
    /// Quality metadata.
    pub metadata: ItemMetadata,
}

impl KnowledgeItem {
    /// Creates an item with zero counts.
    pub fn new(
        id: impl Into<String>,
        section: impl Into<String>,
        content: impl Into<String>,
        source: ItemSource,
    ) -> Self {
        Self {
            id: id.into(),
            section: section.into(),
            content: content.into().trim().to_string(),
            metadata: ItemMetadata::new(source),
        }
    }

    /// Sets the helpful and harmful counts.
    #[must_use]
    pub fn with_counts(mut self, helpful: u32, harmful: u32) -> Self {
        self.metadata.helpful_count = helpful;
        self.metadata.harmful_count = harmful;
        self
    }

    /// `helpful / max(1, helpful + harmful)`.
    ///
    /// Derived on demand for ranking and eviction; never persisted.
    pub fn helpfulness_score(&self) -> f64 {
        let helpful = f64::from(self.metadata.helpful_count);
        let total = helpful + f64::from(self.metadata.harmful_count);
        helpful / total.max(1.0)
    }

    /// True when harmful tags outnumber helpful ones.
    pub fn is_net_harmful(&self) -> bool {
        self.metadata.harmful_count > self.metadata.helpful_count
    }
}

/// Immutable, published playbook snapshot.
///
/// Serialized as `{items, sections, version, next_id}`; `next_id` is optional
/// on input so documents without it still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    items: Vec<KnowledgeItem>,
    sections: Vec<String>,
    version: u64,
    #[serde(default)]
    next_id: u64,
}

impl Playbook {
    /// Builds a published snapshot from a validated draft.
    pub(crate) fn from_draft(draft: PlaybookDraft, version: u64) -> Self {
        Self { items: draft.items, sections: draft.sections, version, next_id: draft.next_id }
    }

    /// Monotonic version number, starting at 1.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Configured sections in display order.
    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    /// All items in insertion order.
    pub fn items(&self) -> &[KnowledgeItem] {
        &self.items
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the playbook holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Next value of the id counter.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Looks up an item by id.
    pub fn get(&self, id: &str) -> Option<&KnowledgeItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// True when an item with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Items belonging to `section`.
    pub fn items_in<'a>(&'a self, section: &'a str) -> impl Iterator<Item = &'a KnowledgeItem> + 'a {
        self.items.iter().filter(move |item| item.section == section)
    }

    /// Starts a new draft based on this version.
    pub fn to_draft(&self) -> PlaybookDraft {
        PlaybookDraft {
            base_version: self.version,
            sections: self.sections.clone(),
            items: self.items.clone(),
            next_id: self.next_id,
        }
    }

    /// Checks every invariant; used when loading documents from disk.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(PlaybookError::Validation("published version must be >= 1".to_string()));
        }
        validate_contents(&self.sections, &self.items)
    }

    /// Per-section statistics.
    pub fn stats(&self) -> PlaybookStats {
        let mut sections: BTreeMap<String, SectionStats> = self
            .sections
            .iter()
            .map(|s| (s.clone(), SectionStats::default()))
            .collect();
        let mut by_source: BTreeMap<String, usize> = BTreeMap::new();

        for item in &self.items {
            let entry = sections.entry(item.section.clone()).or_default();
            entry.items += 1;
            entry.helpful += u64::from(item.metadata.helpful_count);
            entry.harmful += u64::from(item.metadata.harmful_count);
            entry.score_sum += item.helpfulness_score();

            *by_source.entry(item.metadata.source.as_str().to_string()).or_default() += 1;
        }

        PlaybookStats { version: self.version, total_items: self.items.len(), sections, by_source }
    }

    /// Renders `items` as prompt context, grouped by section in playbook order.
    pub fn as_context(&self, items: &[KnowledgeItem]) -> String {
        let mut context = String::new();

        for section in &self.sections {
            let in_section: Vec<&KnowledgeItem> =
                items.iter().filter(|item| &item.section == section).collect();
            if in_section.is_empty() {
                continue;
            }

            writeln!(context, "## {}\n", section).unwrap();
            for item in in_section {
                writeln!(
                    context,
                    "- [{}] {} (helpful={}, harmful={})",
                    item.id, item.content, item.metadata.helpful_count, item.metadata.harmful_count
                )
                .unwrap();
            }
            context.push('\n');
        }

        context.trim().to_string()
    }
}

/// Mutable working copy of a playbook, derived from a specific base version.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookDraft {
    /// Version this draft was derived from (0 for the very first publish).
    pub base_version: u64,
    /// Sections in display order.
    pub sections: Vec<String>,
    /// Items in insertion order.
    pub items: Vec<KnowledgeItem>,
    /// Id counter.
    pub next_id: u64,
}

impl PlaybookDraft {
    /// Creates the draft for a brand-new playbook.
    pub fn new<I, S>(sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_version: 0,
            sections: sections.into_iter().map(Into::into).collect(),
            items: Vec::new(),
            next_id: 0,
        }
    }

    /// Allocates a fresh id of the form `section-00001`.
    pub fn allocate_id(&mut self, section: &str) -> String {
        let prefix: String = section
            .split_whitespace()
            .next()
            .unwrap_or("general")
            .chars()
            .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();

        loop {
            self.next_id += 1;
            let id = format!("{}-{:05}", prefix, self.next_id);
            if !self.contains(&id) {
                return id;
            }
        }
    }

    /// Adds a new item with a freshly allocated id and returns the id.
    pub fn add_item(&mut self, section: &str, content: &str, source: ItemSource) -> String {
        let id = self.allocate_id(section);
        self.items.push(KnowledgeItem::new(id.clone(), section, content, source));
        id
    }

    /// Looks up an item by id.
    pub fn get(&self, id: &str) -> Option<&KnowledgeItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut KnowledgeItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// True when an item with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Removes and returns the item with `id`.
    pub fn remove(&mut self, id: &str) -> Option<KnowledgeItem> {
        let position = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(position))
    }

    /// Checks every invariant a published playbook must satisfy.
    pub fn validate(&self) -> Result<()> {
        validate_contents(&self.sections, &self.items)
    }
}

fn validate_contents(sections: &[String], items: &[KnowledgeItem]) -> Result<()> {
    if sections.is_empty() {
        return Err(PlaybookError::Validation("playbook needs at least one section".to_string()));
    }

    let mut seen_sections = HashSet::new();
    for section in sections {
        if section.trim().is_empty() {
            return Err(PlaybookError::Validation("section names cannot be empty".to_string()));
        }
        if !seen_sections.insert(section.as_str()) {
            return Err(PlaybookError::Validation(format!("duplicate section: {}", section)));
        }
    }

    let mut seen_ids = HashSet::new();
    for item in items {
        if item.id.trim().is_empty() {
            return Err(PlaybookError::Validation("item id cannot be empty".to_string()));
        }
        if !seen_ids.insert(item.id.as_str()) {
            return Err(PlaybookError::Validation(format!("duplicate item id: {}", item.id)));
        }
        if !seen_sections.contains(item.section.as_str()) {
            return Err(PlaybookError::Validation(format!(
                "item {} uses unknown section: {}",
                item.id, item.section
            )));
        }
        if item.content.trim().is_empty() {
            return Err(PlaybookError::Validation(format!("item {} has empty content", item.id)));
        }
    }

    Ok(())
}

/// Statistics for one section.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SectionStats {
    /// Number of items.
    pub items: usize,
    /// Sum of helpful counts.
    pub helpful: u64,
    /// Sum of harmful counts.
    pub harmful: u64,
    #[serde(skip)]
    score_sum: f64,
}

impl SectionStats {
    /// Mean helpfulness score, or zero for an empty section.
    pub fn mean_score(&self) -> f64 {
        if self.items == 0 { 0.0 } else { self.score_sum / self.items as f64 }
    }
}

/// Summary of a playbook version.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybookStats {
    /// Version summarized.
    pub version: u64,
    /// Total number of items.
    pub total_items: usize,
    /// Per-section numbers.
    pub sections: BTreeMap<String, SectionStats>,
    /// Item counts keyed by source.
    pub by_source: BTreeMap<String, usize>,
}
