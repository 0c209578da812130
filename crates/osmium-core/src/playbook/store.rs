//! Versioned playbook storage.
//!
//! Stores hand out `Arc<Playbook>` snapshots that never change after publish.
//! [`PlaybookStore::publish`] is the single mutation point and performs a
//! compare-and-swap on the draft's base version, so of two writers that read
//! the same version only the first one to publish wins.

use std::sync::{Arc, RwLock};

use tracing::info;

use super::error::{PlaybookError, Result};
use super::types::{Playbook, PlaybookDraft};

/// Storage backend for versioned playbooks.
pub trait PlaybookStore: Send + Sync {
    /// Loads the latest published version.
    ///
    /// # Errors
    /// Returns `PlaybookError::NotFound` if nothing has been published.
    fn load(&self) -> Result<Arc<Playbook>>;

    /// Loads a historical version.
    ///
    /// # Errors
    /// Returns `PlaybookError::VersionMissing` for unknown versions.
    fn load_version(&self, version: u64) -> Result<Arc<Playbook>>;

    /// Lists every published version in ascending order.
    fn versions(&self) -> Result<Vec<u64>>;

    /// Validates `draft` and publishes it as `draft.base_version + 1`.
    ///
    /// # Errors
    /// Returns `PlaybookError::Validation` for malformed drafts and
    /// `PlaybookError::VersionConflict` when the base version is stale.
    fn publish(&self, draft: PlaybookDraft) -> Result<Arc<Playbook>>;

    /// Publishes the item set of an older version as a new version.
    ///
    /// History is never rewritten; the id counter keeps the larger of the two
    /// values so ids handed out after `version` are not reused.
    fn rollback(&self, version: u64) -> Result<Arc<Playbook>> {
        let current = self.load()?;
        let target = self.load_version(version)?;

        let mut draft = target.to_draft();
        draft.base_version = current.version();
        draft.next_id = draft.next_id.max(current.next_id());

        info!(from = current.version(), restored = version, "Rolling back playbook");
        self.publish(draft)
    }
}

/// Checks the compare-and-swap precondition and builds the next snapshot.
pub(crate) fn next_snapshot(current: Option<&Playbook>, draft: PlaybookDraft) -> Result<Playbook> {
    draft.validate()?;

    let current_version = current.map_or(0, Playbook::version);
    if draft.base_version != current_version {
        return Err(PlaybookError::VersionConflict {
            expected: draft.base_version,
            current: current_version,
        });
    }

    Ok(Playbook::from_draft(draft, current_version + 1))
}

/// In-memory store keeping every published version.
#[derive(Debug, Default)]
pub struct InMemoryPlaybookStore {
    history: RwLock<Vec<Arc<Playbook>>>,
}

impl InMemoryPlaybookStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store and publishes `draft` as version 1.
    ///
    /// # Errors
    /// Returns `PlaybookError::Validation` if the draft is malformed.
    pub fn with_initial(draft: PlaybookDraft) -> Result<Self> {
        let store = Self::new();
        store.publish(draft)?;
        Ok(store)
    }
}

impl PlaybookStore for InMemoryPlaybookStore {
    fn load(&self) -> Result<Arc<Playbook>> {
        let history = self.history.read().expect("Playbook history lock poisoned");
        history.last().cloned().ok_or(PlaybookError::NotFound)
    }

    fn load_version(&self, version: u64) -> Result<Arc<Playbook>> {
        let history = self.history.read().expect("Playbook history lock poisoned");
        history
            .iter()
            .find(|p| p.version() == version)
            .cloned()
            .ok_or(PlaybookError::VersionMissing(version))
    }

    fn versions(&self) -> Result<Vec<u64>> {
        let history = self.history.read().expect("Playbook history lock poisoned");
        Ok(history.iter().map(|p| p.version()).collect())
    }

    fn publish(&self, draft: PlaybookDraft) -> Result<Arc<Playbook>> {
        let mut history = self.history.write().expect("Playbook history lock poisoned");
        let next = Arc::new(next_snapshot(history.last().map(Arc::as_ref), draft)?);

        info!(version = next.version(), items = next.len(), "Published playbook");
        history.push(Arc::clone(&next));
        Ok(next)
    }
}
