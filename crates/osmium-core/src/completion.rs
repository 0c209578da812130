//! Schema-typed completion calls.
//!
//! Wraps a [`Model`] call with the two recovery paths every component shares:
//! a failed call is retried once, and output that cannot be coerced is
//! re-prompted once with the failure appended to the conversation.

use std::time::Duration;

use osmium_abstraction::{ChatMessage, Model, ModelError, ModelParameters, ResponseFormat};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::coercion::{CoercionStep, ExpectedShape, SchemaMismatchError, coerce};

/// Attempts per model call (the first try plus one retry).
const CALL_ATTEMPTS: usize = 2;

/// Errors from a structured completion.
#[derive(Error, Debug, Clone)]
pub enum CompletionError {
    /// The model call failed twice in a row.
    #[error("Model call failed after {attempts} attempts: {source}")]
    Model {
        /// Last failure.
        #[source]
        source: ModelError,
        /// Attempts made.
        attempts: usize,
    },

    /// The reply could not be coerced, even after a re-prompt.
    #[error(transparent)]
    Schema(#[from] SchemaMismatchError),
}

impl CompletionError {
    /// Raw model text, when the model replied at all.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Self::Model { .. } => None,
            Self::Schema(mismatch) => Some(&mismatch.raw),
        }
    }
}

/// A request for a reply of a specific JSON shape.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// Conversation to complete.
    pub messages: Vec<ChatMessage>,
    /// JSON schema of the expected reply, sent as the response format.
    pub schema: Value,
    /// Top-level shape used for coercion.
    pub shape: ExpectedShape,
    /// Sampling parameters; `response_format` is overwritten with `schema`.
    pub parameters: ModelParameters,
    /// Per-call deadline. A timeout counts as a failed call.
    pub timeout: Option<Duration>,
}

/// A coerced reply.
#[derive(Debug, Clone)]
pub struct StructuredReply<T> {
    /// Typed value.
    pub value: T,
    /// Raw text the value was coerced from.
    pub raw: String,
    /// Coercion steps applied.
    pub path: Vec<CoercionStep>,
}

/// Requests a schema-typed reply from `model`.
///
/// # Errors
/// Returns `CompletionError::Model` when a call fails twice and
/// `CompletionError::Schema` when neither the reply nor the re-prompted reply
/// can be coerced into `T`.
pub async fn complete_structured<T: DeserializeOwned>(
    model: &dyn Model,
    request: StructuredRequest,
) -> Result<StructuredReply<T>, CompletionError> {
    let StructuredRequest { mut messages, schema, shape, parameters, timeout } = request;
    let parameters = ModelParameters {
        response_format: Some(ResponseFormat::JsonSchema(schema.clone())),
        ..parameters
    };

    let mut reprompted = false;
    loop {
        let raw = call_with_retry(model, &messages, &parameters, timeout).await?;

        match coerce::<T>(&raw, shape) {
            Ok(coerced) => {
                return Ok(StructuredReply { value: coerced.value, raw, path: coerced.path });
            }
            Err(mismatch) if !reprompted => {
                warn!(
                    model_id = %model.model_id(),
                    target = %mismatch.target,
                    reason = %mismatch.reason,
                    "Reply did not match schema, re-prompting"
                );
                messages.push(ChatMessage::assistant(raw));
                messages.push(ChatMessage::user(reprompt_message(&mismatch, &schema)));
                reprompted = true;
            }
            Err(mismatch) => return Err(CompletionError::Schema(mismatch)),
        }
    }
}

async fn call_with_retry(
    model: &dyn Model,
    messages: &[ChatMessage],
    parameters: &ModelParameters,
    timeout: Option<Duration>,
) -> Result<String, CompletionError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call_once(model, messages, parameters, timeout).await {
            Ok(content) => {
                debug!(model_id = %model.model_id(), attempt, "Completion succeeded");
                return Ok(content);
            }
            Err(source) if attempt < CALL_ATTEMPTS => {
                warn!(model_id = %model.model_id(), attempt, error = %source, "Completion failed, retrying");
            }
            Err(source) => return Err(CompletionError::Model { source, attempts: attempt }),
        }
    }
}

async fn call_once(
    model: &dyn Model,
    messages: &[ChatMessage],
    parameters: &ModelParameters,
    timeout: Option<Duration>,
) -> Result<String, ModelError> {
    let call = model.generate_chat_completion(messages, Some(parameters.clone()));
    let response = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ModelError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)))??,
        None => call.await?,
    };
    Ok(response.content)
}

fn reprompt_message(mismatch: &SchemaMismatchError, schema: &Value) -> String {
    format!(
        "Your previous reply could not be used ({}). Reply again with only a JSON value \
         matching this schema, with no surrounding text:\n{}",
        mismatch.reason,
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmium_models::MockModel;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Verdict {
        ok: bool,
    }

    fn request() -> StructuredRequest {
        StructuredRequest {
            messages: vec![ChatMessage::user("judge")],
            schema: json!({"type": "object", "properties": {"ok": {"type": "boolean"}}, "required": ["ok"]}),
            shape: ExpectedShape::object(),
            parameters: ModelParameters::default(),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_first_reply_used() {
        let model = MockModel::scripted("mock", vec![Ok(r#"{"ok": true}"#.to_string())]);
        let reply: StructuredReply<Verdict> = complete_structured(&model, request()).await.unwrap();
        assert!(reply.value.ok);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_retried_once() {
        let model = MockModel::scripted(
            "mock",
            vec![Err(ModelError::RequestError("reset".into())), Ok(r#"{"ok": false}"#.to_string())],
        );
        let reply: StructuredReply<Verdict> = complete_structured(&model, request()).await.unwrap();
        assert!(!reply.value.ok);
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_model_failure_surfaces() {
        let model = MockModel::scripted(
            "mock",
            vec![Err(ModelError::Timeout(5)), Err(ModelError::RequestError("down".into()))],
        );
        let err = complete_structured::<Verdict>(&model, request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Model { attempts: 2, .. }));
        assert!(err.raw_text().is_none());
    }

    #[tokio::test]
    async fn test_schema_failure_reprompts_with_context() {
        let model = MockModel::scripted(
            "mock",
            vec![Ok("not json".to_string()), Ok(r#"{"ok": true}"#.to_string())],
        );
        let reply: StructuredReply<Verdict> = complete_structured(&model, request()).await.unwrap();
        assert!(reply.value.ok);

        let second = &model.requests()[1];
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].role, "assistant");
        assert_eq!(second[1].content, "not json");
        assert!(second[2].content.contains("could not be used"));
    }

    #[tokio::test]
    async fn test_schema_failure_twice_keeps_raw() {
        let model = MockModel::scripted(
            "mock",
            vec![Ok(r#"{"okay": 1}"#.to_string()), Ok(r#"{"still": "wrong"}"#.to_string())],
        );
        let err = complete_structured::<Verdict>(&model, request()).await.unwrap_err();
        assert_eq!(err.raw_text(), Some(r#"{"still": "wrong"}"#));
        assert_eq!(model.call_count(), 2);
    }

    struct StalledModel;

    #[async_trait::async_trait]
    impl Model for StalledModel {
        async fn generate_chat_completion(
            &self,
            _messages: &[ChatMessage],
            _parameters: Option<ModelParameters>,
        ) -> Result<osmium_abstraction::ModelResponse, ModelError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(ModelError::Other("unreachable".to_string()))
        }

        fn model_id(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_call() {
        let request = StructuredRequest { timeout: Some(Duration::from_millis(10)), ..request() };
        let err = complete_structured::<Verdict>(&StalledModel, request).await.unwrap_err();

        match err {
            CompletionError::Model { source: ModelError::Timeout(ms), attempts } => {
                assert_eq!(ms, 10);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
