//! Delta operations and their application to a draft.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::playbook::{KnowledgeItem, PlaybookDraft};

/// Change applied to an existing item by an UPDATE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChange {
    /// Added to `helpful_count`.
    #[serde(default)]
    pub helpful_increment: u32,
    /// Added to `harmful_count`.
    #[serde(default)]
    pub harmful_increment: u32,
    /// Replacement content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ItemChange {
    /// One more helpful tag.
    pub fn helpful() -> Self {
        Self { helpful_increment: 1, ..Self::default() }
    }

    /// One more harmful tag.
    pub fn harmful() -> Self {
        Self { harmful_increment: 1, ..Self::default() }
    }

    /// Counts absorbed from a merged duplicate.
    pub fn absorb(item: &KnowledgeItem) -> Self {
        Self {
            helpful_increment: item.metadata.helpful_count,
            harmful_increment: item.metadata.harmful_count,
            content: None,
        }
    }
}

/// One change to the playbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum DeltaOperation {
    /// Insert a new item.
    Add {
        /// Item to insert, id already allocated.
        item: KnowledgeItem,
        /// Why.
        reason: String,
    },
    /// Modify counts or content of an existing item.
    Update {
        /// Target item.
        item_id: String,
        /// Modification.
        change: ItemChange,
        /// Why.
        reason: String,
    },
    /// Delete an item.
    Remove {
        /// Target item.
        item_id: String,
        /// Why.
        reason: String,
    },
}

impl DeltaOperation {
    /// Id of the item this operation touches.
    pub fn item_id(&self) -> &str {
        match self {
            Self::Add { item, .. } => &item.id,
            Self::Update { item_id, .. } | Self::Remove { item_id, .. } => item_id,
        }
    }

    /// `ADD`, `UPDATE` or `REMOVE`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "ADD",
            Self::Update { .. } => "UPDATE",
            Self::Remove { .. } => "REMOVE",
        }
    }

    /// Reason recorded with the operation.
    pub fn reason(&self) -> &str {
        match self {
            Self::Add { reason, .. } | Self::Update { reason, .. } | Self::Remove { reason, .. } => {
                reason
            }
        }
    }
}

/// Applies `op` to `draft`.
///
/// Returns `false` without touching the draft when the operation references
/// an item that no longer exists (or, for ADD, one that already does).
pub fn apply(draft: &mut PlaybookDraft, op: &DeltaOperation, now: DateTime<Utc>) -> bool {
    match op {
        DeltaOperation::Add { item, .. } => {
            if draft.contains(&item.id) {
                return false;
            }
            draft.items.push(item.clone());
            true
        }
        DeltaOperation::Update { item_id, change, .. } => {
            let Some(item) = draft.get_mut(item_id) else {
                return false;
            };
            let metadata = &mut item.metadata;
            metadata.helpful_count = metadata.helpful_count.saturating_add(change.helpful_increment);
            metadata.harmful_count = metadata.harmful_count.saturating_add(change.harmful_increment);
            if let Some(content) = &change.content {
                let content = content.trim();
                if !content.is_empty() {
                    item.content = content.to_string();
                }
            }
            item.metadata.last_updated = now;
            true
        }
        DeltaOperation::Remove { item_id, .. } => draft.remove(item_id).is_some(),
    }
}
