//! OpenAI model and embedder implementations.
//!
//! Both talk to `{base_url}/chat/completions` and `{base_url}/embeddings`, so
//! any OpenAI-compatible server (vLLM, LM Studio, a gateway) works by changing
//! the base URL.

use async_trait::async_trait;
use osmium_abstraction::{
    ChatMessage, Embedder, EmbeddingError, Model, ModelError, ModelParameters, ModelResponse,
    ModelUsage, ResponseFormat,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::env;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[allow(clippy::disallowed_methods)] // env::var is needed for API key loading
fn api_key_from_env() -> Option<String> {
    env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
}

/// OpenAI chat model implementation.
#[derive(Debug, Clone)]
pub struct OpenAIModel {
    /// The model ID (e.g., "gpt-4o-mini").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl OpenAIModel {
    /// Creates a new `OpenAIModel`, reading the key from `OPENAI_API_KEY`.
    ///
    /// # Errors
    /// Returns a `ModelError` if the API key is not found in environment variables.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        let api_key = api_key_from_env().ok_or_else(|| {
            ModelError::UnsupportedModelProvider(
                "OPENAI_API_KEY environment variable not set".to_string(),
            )
        })?;
        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `OpenAIModel` with a custom API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self { model_id, api_key, base_url: DEFAULT_BASE_URL.to_string(), client: Client::new() }
    }

    /// Points the model at an OpenAI-compatible endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Converts the requested response format into OpenAI's `response_format` object.
    fn convert_response_format(format: Option<&ResponseFormat>) -> Option<Value> {
        match format? {
            ResponseFormat::Text => None,
            ResponseFormat::Json => Some(json!({"type": "json_object"})),
            ResponseFormat::JsonSchema(schema) => Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response_schema",
                    "schema": schema,
                    "strict": false
                }
            })),
        }
    }
}

#[async_trait]
impl Model for OpenAIModel {
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            parameters = ?parameters,
            "OpenAIModel generating chat completion"
        );

        let url = format!("{}/chat/completions", self.base_url);

        let mut request_body = OpenAIRequest {
            model: self.model_id.clone(),
            messages: messages
                .iter()
                .map(|msg| OpenAIMessage { role: msg.role.clone(), content: msg.content.clone() })
                .collect(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            response_format: None,
        };

        if let Some(params) = parameters {
            request_body.response_format =
                Self::convert_response_format(params.response_format.as_ref());
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            request_body.max_tokens = params.max_tokens;
            request_body.stop = params.stop_sequences;
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send request to OpenAI API");
                ModelError::RequestError(format!("Network error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "OpenAI API returned error status");

            if status == 402 || status == 429 {
                return Err(ModelError::QuotaExceeded {
                    provider: "openai".to_string(),
                    message: Some(error_text),
                });
            }

            return Err(ModelError::ModelResponseError(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let openai_response: OpenAIResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse OpenAI API response");
            ModelError::SerializationError(format!("Failed to parse response: {}", e))
        })?;

        let content = openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                error!("No content in OpenAI API response");
                ModelError::ModelResponseError("No content in API response".to_string())
            })?;

        let usage = openai_response.usage.map(|u| ModelUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse { content, model_id: Some(self.model_id.clone()), usage })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// OpenAI embeddings implementation.
#[derive(Debug, Clone)]
pub struct OpenAIEmbedder {
    model_id: String,
    api_key: String,
    base_url: String,
    dimensions: usize,
    client: Client,
}

impl OpenAIEmbedder {
    /// Creates an embedder reading the key from `OPENAI_API_KEY`.
    ///
    /// # Errors
    /// Returns an error if the API key is not set.
    pub fn new(model_id: String, dimensions: usize) -> Result<Self, EmbeddingError> {
        let api_key = api_key_from_env().ok_or_else(|| {
            EmbeddingError::UnsupportedProvider(
                "OPENAI_API_KEY environment variable not set".to_string(),
            )
        })?;
        Ok(Self::with_api_key(model_id, api_key, dimensions))
    }

    /// Creates an embedder with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String, dimensions: usize) -> Self {
        Self {
            model_id,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            dimensions,
            client: Client::new(),
        }
    }

    /// Points the embedder at an OpenAI-compatible endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        debug!(model_id = %self.model_id, text_len = text.len(), "OpenAIEmbedder embedding text");

        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model_id,
            input: text,
            dimensions: Some(self.dimensions),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::RequestError(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Embedding API returned error status");
            return Err(EmbeddingError::RequestError(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty data array".to_string()))?;

        if vector.len() != self.dimensions {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// OpenAI API request/response structures

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
