//! Semantic deduplication within a section.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::playbook::{KnowledgeItem, PlaybookDraft, PlaybookIndex, Result, cosine_similarity};

/// When a merge happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    /// A new item was folded into an existing one on insertion.
    Insertion,
    /// Two existing items were folded together by the consolidation sweep.
    Consolidation,
}

/// One merge of two near-duplicate items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Item that was kept and absorbed the counts.
    pub survivor_id: String,
    /// Item whose content was discarded.
    pub merged_id: String,
    /// Cosine similarity between the two.
    pub similarity: f32,
    /// Section both items belong to.
    pub section: String,
    /// When the merge happened.
    pub phase: MergePhase,
}

/// Every merge performed by one curation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupReport {
    /// Merges in the order they were applied.
    pub merges: Vec<MergeRecord>,
}

impl DedupReport {
    /// Number of merges.
    pub fn merge_count(&self) -> usize {
        self.merges.len()
    }

    /// True when nothing was merged.
    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
    }
}

/// Orders survivors first: higher score, then older.
pub(crate) fn survivor_order(a: &KnowledgeItem, b: &KnowledgeItem) -> Ordering {
    b.helpfulness_score()
        .partial_cmp(&a.helpfulness_score())
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.metadata.created_at.cmp(&b.metadata.created_at))
}

/// Finds the most similar same-section item at or above `threshold`.
pub(crate) async fn find_duplicate(
    index: &PlaybookIndex,
    draft: &PlaybookDraft,
    candidate: &KnowledgeItem,
    threshold: f32,
) -> Result<Option<(String, f32)>> {
    let candidate_vector = index.embed_item(candidate).await?;
    let mut best: Option<(String, f32)> = None;

    for existing in draft.items.iter().filter(|i| i.section == candidate.section && i.id != candidate.id) {
        let vector = index.embed_item(existing).await?;
        let similarity = cosine_similarity(&candidate_vector, &vector).unwrap_or(0.0);
        if similarity >= threshold && best.as_ref().is_none_or(|(_, s)| similarity > *s) {
            best = Some((existing.id.clone(), similarity));
        }
    }

    Ok(best)
}

/// Pairs of `(survivor_id, merged_id, similarity)` found among the items of
/// `section`.
///
/// Items are visited best-first; each surviving item absorbs every later item
/// similar to it, and an absorbed item never absorbs others.
pub(crate) async fn sweep_section(
    index: &PlaybookIndex,
    draft: &PlaybookDraft,
    section: &str,
    threshold: f32,
) -> Result<Vec<(String, String, f32)>> {
    let mut items: Vec<&KnowledgeItem> = draft.items.iter().filter(|i| i.section == section).collect();
    items.sort_by(|a, b| survivor_order(a, b));

    let mut vectors = Vec::with_capacity(items.len());
    for item in &items {
        vectors.push(index.embed_item(item).await?);
    }

    let mut absorbed = vec![false; items.len()];
    let mut pairs = Vec::new();
    for i in 0..items.len() {
        if absorbed[i] {
            continue;
        }
        for j in (i + 1)..items.len() {
            if absorbed[j] {
                continue;
            }
            let similarity = cosine_similarity(&vectors[i], &vectors[j]).unwrap_or(0.0);
            if similarity >= threshold {
                absorbed[j] = true;
                pairs.push((items[i].id.clone(), items[j].id.clone(), similarity));
            }
        }
    }

    Ok(pairs)
}
