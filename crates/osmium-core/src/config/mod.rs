//! Configuration file support.
//!
//! Settings are read from TOML. Discovery loads the global file
//! (`~/.osmium/config.toml`) and then the local one (`./osmium.toml`); keys in
//! the local file override the same keys in the global one, table by table.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adaptation::AdapterConfig;
use crate::curator::CuratorConfig;
use crate::generator::GeneratorConfig;
use crate::reflector::ReflectorConfig;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Playbook layout and storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookConfig {
    /// Sections in display order.
    #[serde(default = "default_sections")]
    pub sections: Vec<String>,
    /// Section for insights that name none.
    #[serde(default = "default_section")]
    pub default_section: String,
    /// Directory of the file-backed store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_sections() -> Vec<String> {
    ["strategies", "common_mistakes", "formulas", "safety", "general"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_section() -> String {
    "general".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".osmium")
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            sections: default_sections(),
            default_section: default_section(),
            data_dir: default_data_dir(),
        }
    }
}

/// Completion service selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Provider: `mock` or `openai`.
    #[serde(default = "default_model_type")]
    pub model_type: String,
    /// Provider model id.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// API key; falls back to the provider's environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Alternative endpoint for OpenAI-compatible servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

fn default_model_type() -> String {
    "mock".to_string()
}

fn default_model_id() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_type: default_model_type(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Embedding service selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Provider: `hash` or `openai`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Provider model id.
    #[serde(default = "default_embedding_model_id")]
    pub model_id: String,
    /// Vector length.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}

fn default_embedding_model_id() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    256
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model_id: default_embedding_model_id(),
            dimensions: default_dimensions(),
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsmiumConfig {
    /// Playbook layout and storage.
    #[serde(default)]
    pub playbook: PlaybookConfig,
    /// Generator settings.
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Reflector settings.
    #[serde(default)]
    pub reflector: ReflectorConfig,
    /// Curator settings.
    #[serde(default)]
    pub curator: CuratorConfig,
    /// Adaptation loop settings.
    #[serde(default)]
    pub adaptation: AdapterConfig,
    /// Completion service.
    #[serde(default)]
    pub model: ModelSettings,
    /// Embedding service.
    #[serde(default)]
    pub embedding: EmbeddingSettings,
}

impl OsmiumConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let table = read_table(path)?;
        Self::from_table(table, path)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".osmium")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("osmium.toml")
    }

    /// Discover and load configuration files.
    ///
    /// Loads configuration from:
    /// 1. Global config (~/.osmium/config.toml)
    /// 2. Local config (./osmium.toml)
    ///
    /// Local keys override global ones. Missing files are skipped; unreadable
    /// or malformed ones are errors.
    pub fn discover_and_load() -> ConfigResult<Self> {
        Self::discover_from(&Self::default_global_path(), &Self::default_local_path())
    }

    /// Discovery over explicit global and local paths.
    pub fn discover_from(global: &Path, local: &Path) -> ConfigResult<Self> {
        let mut merged = toml::Table::new();
        let mut origin = local;

        for path in [global, local] {
            if !path.exists() {
                continue;
            }
            merge_tables(&mut merged, read_table(path)?);
            origin = path;
        }

        Self::from_table(merged, origin)
    }

    /// Check the settings for values the loop cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let playbook = &self.playbook;
        if playbook.sections.is_empty() {
            return Err(ConfigError::InvalidValue("playbook.sections cannot be empty".to_string()));
        }
        if !playbook.sections.contains(&playbook.default_section) {
            return Err(ConfigError::InvalidValue(format!(
                "playbook.default_section '{}' is not one of the sections",
                playbook.default_section
            )));
        }
        if self.generator.max_items == 0 {
            return Err(ConfigError::InvalidValue("generator.max_items must be at least 1".to_string()));
        }
        if self.reflector.max_rounds == 0 {
            return Err(ConfigError::InvalidValue("reflector.max_rounds must be at least 1".to_string()));
        }
        let threshold = self.curator.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "curator.similarity_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.curator.max_size == 0 {
            return Err(ConfigError::InvalidValue("curator.max_size must be at least 1".to_string()));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::InvalidValue("embedding.dimensions must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Curator settings with the playbook's default section applied.
    pub fn curator_config(&self) -> CuratorConfig {
        CuratorConfig { default_section: self.playbook.default_section.clone(), ..self.curator.clone() }
    }

    fn from_table(table: toml::Table, origin: &Path) -> ConfigResult<Self> {
        toml::Value::Table(table)
            .try_into()
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", origin.display(), e)))
    }
}

fn read_table(path: &Path) -> ConfigResult<toml::Table> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

    content.parse::<toml::Table>().map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
}

/// Overlays `overlay` onto `base`; nested tables merge key by key.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curator::CurationMode;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = OsmiumConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generator.max_items, 50);
        assert_eq!(config.reflector.max_rounds, 5);
        assert!((config.curator.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.curator.max_size, 200);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = OsmiumConfig::from_toml_str(
            r#"
            [curator]
            max_size = 50
            mode = "lazy"

            [model]
            model_type = "openai"
            "#,
        )
        .unwrap();

        assert_eq!(config.curator.max_size, 50);
        assert_eq!(config.curator.mode, CurationMode::Lazy);
        assert!(config.curator.prune_harmful);
        assert_eq!(config.model.model_type, "openai");
        assert_eq!(config.model.model_id, "gpt-4o-mini");
        assert_eq!(config.playbook.sections.len(), 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = OsmiumConfig::default();
        config.playbook.default_section = "misc".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = OsmiumConfig::default();
        config.curator.similarity_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = OsmiumConfig::default();
        config.reflector.max_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_overrides_global_key_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        let local = temp_dir.path().join("local.toml");
        std::fs::write(&global, "[curator]\nmax_size = 10\nprune_harmful = false\n").unwrap();
        std::fs::write(&local, "[curator]\nmax_size = 20\n").unwrap();

        let config = OsmiumConfig::discover_from(&global, &local).unwrap();
        assert_eq!(config.curator.max_size, 20);
        assert!(!config.curator.prune_harmful);
    }

    #[test]
    fn test_discover_without_files_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = OsmiumConfig::discover_from(
            &temp_dir.path().join("missing-global.toml"),
            &temp_dir.path().join("missing-local.toml"),
        )
        .unwrap();
        assert_eq!(config, OsmiumConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("osmium.toml");
        let mut config = OsmiumConfig::default();
        config.generator.max_items = 12;

        config.save_to_file(&path).unwrap();
        let loaded = OsmiumConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.generator.max_items, 12);
    }

    #[test]
    fn test_missing_file() {
        let err = OsmiumConfig::load_from_file(Path::new("/nonexistent/osmium.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
