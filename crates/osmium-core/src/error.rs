//! Error types for Osmium Core.

use thiserror::Error;

use crate::adaptation::AdaptationError;
use crate::coercion::SchemaMismatchError;
use crate::config::ConfigError;
use crate::curator::CurationError;
use crate::generator::GenerationError;
use crate::playbook::PlaybookError;
use crate::reflector::ReflectionError;

/// Core error type for Osmium operations.
#[derive(Error, Debug)]
pub enum OsmiumError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Playbook storage, validation and version errors
    #[error("Playbook error: {0}")]
    Playbook(#[from] PlaybookError),

    /// Uncoercible model output
    #[error("Schema mismatch: {0}")]
    Schema(#[from] SchemaMismatchError),

    /// Draft generation errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Reflection errors
    #[error("Reflection error: {0}")]
    Reflection(#[from] ReflectionError),

    /// Curation errors
    #[error("Curation error: {0}")]
    Curation(#[from] CurationError),

    /// Adaptation loop errors
    #[error("Adaptation error: {0}")]
    Adaptation(#[from] AdaptationError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Osmium operations.
pub type Result<T> = std::result::Result<T, OsmiumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_osmium_error_playbook_conversion() {
        let playbook_err = PlaybookError::VersionConflict { expected: 1, current: 2 };
        let osmium_err: OsmiumError = playbook_err.into();
        match osmium_err {
            OsmiumError::Playbook(PlaybookError::VersionConflict { expected, current }) => {
                assert_eq!((expected, current), (1, 2));
            }
            _ => panic!("Expected Playbook error variant"),
        }
    }

    #[test]
    fn test_osmium_error_config() {
        let err: OsmiumError = ConfigError::InvalidValue("max_size".to_string()).into();
        assert_eq!(err.to_string(), "Configuration error: Invalid configuration value: max_size");
    }

    #[test]
    fn test_osmium_error_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let osmium_err: OsmiumError = io_err.into();
        assert!(matches!(osmium_err, OsmiumError::Io(_)));
    }
}
