//! Service implementations for Osmium.
//!
//! This crate provides concrete implementations of the `Model` and `Embedder`
//! traits.
//!
//! # Supported Providers
//!
//! - **Mock**: Scripted or schema-shaped replies for testing and offline runs
//! - **OpenAI**: OpenAI's chat and embedding APIs, or any compatible endpoint
//! - **Hash**: Deterministic feature-hashing embeddings (no network)

pub mod embedding;
pub mod factory;
pub mod openai;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use osmium_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage, ResponseFormat,
};
use serde_json::{Map, Value};
use tracing::debug;

pub use embedding::HashEmbedder;
pub use factory::{EmbedderConfig, EmbedderFactory, EmbedderType, ModelConfig, ModelFactory, ModelType};
pub use openai::{OpenAIEmbedder, OpenAIModel};

/// A mock implementation of the `Model` trait for testing and demonstration.
///
/// Scripted replies are returned in order. Once the script is exhausted, the
/// mock answers with a skeleton value built from the requested JSON schema (or
/// an echo of the last message when no schema was requested).
#[derive(Debug, Default)]
pub struct MockModel {
    id: String,
    script: Mutex<VecDeque<Result<String, ModelError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID and an empty script.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self { id, script: Mutex::default(), requests: Mutex::default() }
    }

    /// Creates a mock that replies with `responses` in order.
    #[must_use]
    pub fn scripted<I>(id: impl Into<String>, responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, ModelError>>,
    {
        Self {
            id: id.into(),
            script: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::default(),
        }
    }

    /// Appends a reply to the end of the script.
    pub fn push_response(&self, response: Result<String, ModelError>) {
        self.script.lock().expect("Mock script lock poisoned").push_back(response);
    }

    /// Every conversation this mock has been asked to complete, in call order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().expect("Mock request lock poisoned").clone()
    }

    /// Number of completion calls received.
    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("Mock request lock poisoned").len()
    }

    fn fallback_reply(messages: &[ChatMessage], parameters: Option<&ModelParameters>) -> String {
        match parameters.and_then(|p| p.response_format.as_ref()) {
            Some(ResponseFormat::JsonSchema(schema)) => skeleton_from_schema(schema).to_string(),
            Some(ResponseFormat::Json) => "{}".to_string(),
            _ => messages
                .last()
                .map(|m| format!("Mock response for: {}", m.content))
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            parameters = ?parameters,
            "MockModel generating chat completion"
        );

        self.requests.lock().expect("Mock request lock poisoned").push(messages.to_vec());

        let scripted = self.script.lock().expect("Mock script lock poisoned").pop_front();
        let content = match scripted {
            Some(reply) => reply?,
            None => Self::fallback_reply(messages, parameters.as_ref()),
        };

        let prompt_tokens = messages.iter().map(|m| count_tokens(&m.content)).sum::<u32>();
        let completion_tokens = count_tokens(&content);

        Ok(ModelResponse {
            content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Builds the smallest value that satisfies a JSON schema's declared shape.
///
/// Only `type`, `properties`, `required` and `items` are honoured; strings
/// become `"mock"`, numbers zero, arrays empty.
pub fn skeleton_from_schema(schema: &Value) -> Value {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut object = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    object.insert(name.clone(), skeleton_from_schema(property));
                }
            }
            Value::Object(object)
        }
        Some("array") => Value::Array(Vec::new()),
        Some("integer" | "number") => Value::from(0),
        Some("boolean") => Value::Bool(false),
        Some("null") => Value::Null,
        _ => Value::String("mock".to_string()),
    }
}

/// Count tokens in a string (simplified: word count).
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let model = MockModel::scripted(
            "mock",
            vec![Ok("first".to_string()), Err(ModelError::Timeout(10)), Ok("third".to_string())],
        );
        let messages = vec![ChatMessage::user("hi")];

        assert_eq!(model.generate_chat_completion(&messages, None).await.unwrap().content, "first");
        assert!(model.generate_chat_completion(&messages, None).await.is_err());
        assert_eq!(model.generate_chat_completion(&messages, None).await.unwrap().content, "third");
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_fallback_follows_schema() {
        let model = MockModel::new("mock".to_string());
        let schema = json!({
            "type": "object",
            "properties": {
                "reasoning": {"type": "string"},
                "bullet_ids": {"type": "array", "items": {"type": "string"}},
                "score": {"type": "number"}
            }
        });
        let params = ModelParameters {
            response_format: Some(ResponseFormat::JsonSchema(schema)),
            ..ModelParameters::default()
        };

        let response = model
            .generate_chat_completion(&[ChatMessage::user("go")], Some(params))
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&response.content).unwrap();
        assert_eq!(value["reasoning"], "mock");
        assert_eq!(value["bullet_ids"], json!([]));
        assert_eq!(value["score"], 0);
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let model = MockModel::new("mock".to_string());
        model.push_response(Ok("ok".to_string()));
        model
            .generate_chat_completion(&[ChatMessage::system("s"), ChatMessage::user("u")], None)
            .await
            .unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][1].content, "u");
    }
}
