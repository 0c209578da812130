//! Error types for playbook operations.

use osmium_abstraction::EmbeddingError;
use thiserror::Error;

/// Errors that can occur during playbook operations.
#[derive(Error, Debug)]
pub enum PlaybookError {
    /// No playbook has been published yet.
    #[error("No playbook exists")]
    NotFound,

    /// The requested historical version was never published.
    #[error("Playbook version {0} not found")]
    VersionMissing(u64),

    /// A mutation would break a playbook invariant.
    #[error("Invalid playbook mutation: {0}")]
    Validation(String),

    /// The draft was computed against a version that is no longer current.
    #[error("Version conflict: draft based on version {expected}, current is {current}")]
    VersionConflict {
        /// Version the draft was derived from.
        expected: u64,
        /// Version currently published.
        current: u64,
    },

    /// Embedding service failure while ranking or comparing items.
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for playbook operations.
pub type Result<T> = std::result::Result<T, PlaybookError>;
