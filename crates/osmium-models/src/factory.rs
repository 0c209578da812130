//! Factories for creating model and embedder instances from configuration.
//!
//! API keys fall back to environment variables when not configured.

use crate::{HashEmbedder, MockModel, OpenAIEmbedder, OpenAIModel};
use osmium_abstraction::{Embedder, EmbeddingError, Model, ModelError};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Model type enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelType {
    /// Mock model for testing.
    Mock,
    /// OpenAI or any OpenAI-compatible endpoint.
    OpenAI,
}

impl FromStr for ModelType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "openai" | "openai-compatible" | "universal" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Model configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// The type of model to create.
    pub model_type: ModelType,
    /// The model ID (e.g., "gpt-4o-mini").
    pub model_id: String,
    /// Optional API key (if not provided, will be loaded from environment).
    pub api_key: Option<String>,
    /// Optional base URL for OpenAI-compatible servers.
    pub base_url: Option<String>,
}

impl ModelConfig {
    /// Creates a new `ModelConfig` with the given type and model ID.
    #[must_use]
    pub fn new(model_type: ModelType, model_id: String) -> Self {
        Self { model_type, model_id, api_key: None, base_url: None }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the base URL for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// Factory for creating model instances.
pub struct ModelFactory;

impl ModelFactory {
    /// Creates a model instance from the given configuration.
    ///
    /// # Errors
    /// Returns a `ModelError` if model creation fails (e.g., missing API key).
    pub fn create(config: ModelConfig) -> Result<Arc<dyn Model>, ModelError> {
        debug!(
            model_type = ?config.model_type,
            model_id = %config.model_id,
            "Creating model instance"
        );

        match config.model_type {
            ModelType::Mock => Ok(Arc::new(MockModel::new(config.model_id))),
            ModelType::OpenAI => {
                let mut model = if let Some(api_key) = config.api_key {
                    OpenAIModel::with_api_key(config.model_id, api_key)
                } else {
                    OpenAIModel::new(config.model_id)?
                };
                if let Some(base_url) = config.base_url {
                    model = model.with_base_url(base_url);
                }
                Ok(Arc::new(model))
            }
        }
    }

    /// Creates a model instance from a model type string and model ID.
    ///
    /// # Errors
    /// Returns a `ModelError` if the model type is unrecognized or creation fails.
    pub fn create_from_str(model_type_str: &str, model_id: String) -> Result<Arc<dyn Model>, ModelError> {
        let model_type = ModelType::from_str(model_type_str).map_err(|()| {
            error!(model_type = %model_type_str, "Unrecognized model type");
            ModelError::UnsupportedModelProvider(format!(
                "Unrecognized model type: {}",
                model_type_str
            ))
        })?;

        Self::create(ModelConfig::new(model_type, model_id))
    }
}

/// Embedder type enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedderType {
    /// Deterministic feature hashing.
    Hash,
    /// OpenAI embeddings endpoint.
    OpenAI,
}

impl FromStr for EmbedderType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hash" | "local" => Ok(Self::Hash),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Embedder configuration.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// The type of embedder to create.
    pub embedder_type: EmbedderType,
    /// The embedding model ID (ignored by the hash embedder).
    pub model_id: String,
    /// Vector length.
    pub dimensions: usize,
    /// Optional API key.
    pub api_key: Option<String>,
    /// Optional base URL for OpenAI-compatible servers.
    pub base_url: Option<String>,
}

impl EmbedderConfig {
    /// Creates a new configuration.
    #[must_use]
    pub fn new(embedder_type: EmbedderType, model_id: String, dimensions: usize) -> Self {
        Self { embedder_type, model_id, dimensions, api_key: None, base_url: None }
    }
}

/// Factory for creating embedder instances.
pub struct EmbedderFactory;

impl EmbedderFactory {
    /// Creates an embedder from configuration.
    ///
    /// # Errors
    /// Returns an `EmbeddingError` if creation fails.
    pub fn create(config: EmbedderConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        debug!(
            embedder_type = ?config.embedder_type,
            model_id = %config.model_id,
            dimensions = config.dimensions,
            "Creating embedder instance"
        );

        match config.embedder_type {
            EmbedderType::Hash => Ok(Arc::new(HashEmbedder::new(config.dimensions)?)),
            EmbedderType::OpenAI => {
                let mut embedder = if let Some(api_key) = config.api_key {
                    OpenAIEmbedder::with_api_key(config.model_id, api_key, config.dimensions)
                } else {
                    OpenAIEmbedder::new(config.model_id, config.dimensions)?
                };
                if let Some(base_url) = config.base_url {
                    embedder = embedder.with_base_url(base_url);
                }
                Ok(Arc::new(embedder))
            }
        }
    }
}
