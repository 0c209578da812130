//! Grow-and-refine pruning rules.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::playbook::{KnowledgeItem, PlaybookDraft};

use super::dedup::survivor_order;

/// Net-harmful items scoring strictly below every peer in their section.
///
/// Returns `(item_id, score, lowest_peer_score)`. An item with no peers is
/// never a candidate, and at most one item per section can qualify.
pub(crate) fn harmful_candidates(draft: &PlaybookDraft) -> Vec<(String, f64, f64)> {
    let mut candidates = Vec::new();

    for section in &draft.sections {
        let items: Vec<&KnowledgeItem> = draft.items.iter().filter(|i| &i.section == section).collect();

        for item in items.iter().filter(|i| i.is_net_harmful()) {
            let lowest_peer = items
                .iter()
                .filter(|peer| peer.id != item.id)
                .map(|peer| peer.helpfulness_score())
                .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

            let score = item.helpfulness_score();
            if let Some(lowest_peer) = lowest_peer {
                if score < lowest_peer {
                    candidates.push((item.id.clone(), score, lowest_peer));
                }
            }
        }
    }

    candidates
}

/// Best item of every section (highest score, oldest on ties).
fn section_champions(draft: &PlaybookDraft) -> HashSet<String> {
    let mut best: HashMap<&str, &KnowledgeItem> = HashMap::new();
    for item in &draft.items {
        best.entry(item.section.as_str())
            .and_modify(|current| {
                if survivor_order(item, *current) == Ordering::Less {
                    *current = item;
                }
            })
            .or_insert(item);
    }
    best.into_values().map(|item| item.id.clone()).collect()
}

/// Next item to evict under the size bound.
///
/// Items are ordered by `(protected_champion, added_this_cycle, score,
/// last_updated)` and the smallest goes first. A section's best item is
/// protected while any item scores strictly lower; this cycle's additions
/// outlive every older unprotected item.
pub(crate) fn eviction_victim(draft: &PlaybookDraft, current_cycle: &HashSet<String>) -> Option<String> {
    let lowest = draft
        .items
        .iter()
        .map(KnowledgeItem::helpfulness_score)
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))?;
    let champions: HashSet<String> = section_champions(draft)
        .into_iter()
        .filter(|id| draft.get(id).is_some_and(|item| item.helpfulness_score() > lowest))
        .collect();

    draft
        .items
        .iter()
        .min_by(|a, b| {
            let key_a = (champions.contains(&a.id), current_cycle.contains(&a.id));
            let key_b = (champions.contains(&b.id), current_cycle.contains(&b.id));
            key_a
                .cmp(&key_b)
                .then_with(|| {
                    a.helpfulness_score()
                        .partial_cmp(&b.helpfulness_score())
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.metadata.last_updated.cmp(&b.metadata.last_updated))
        })
        .map(|item| item.id.clone())
}
