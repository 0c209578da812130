//! Versioned playbook store.
//!
//! The playbook is the knowledge base the whole loop reads from and writes to:
//!
//! - [`Playbook`]: immutable published snapshot
//! - [`PlaybookDraft`]: staged changes against a base version
//! - [`PlaybookStore`]: publish with compare-and-swap, history and rollback
//! - [`PlaybookIndex`]: embedding-backed retrieval with a content-keyed cache

pub mod error;
pub mod file_store;
pub mod index;
pub mod store;
pub mod types;

pub use error::{PlaybookError, Result};
pub use file_store::FilePlaybookStore;
pub use index::{PlaybookIndex, ScoredItem, cosine_similarity};
pub use store::{InMemoryPlaybookStore, PlaybookStore};
pub use types::{
    ItemMetadata, ItemSource, KnowledgeItem, Playbook, PlaybookDraft, PlaybookStats, SectionStats,
};
