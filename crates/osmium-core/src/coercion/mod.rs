//! Coercion of loosely structured model output into typed records.
//!
//! Completion services are not trusted to honour the requested schema. The
//! pipeline below recovers the shapes models are known to produce and records
//! every transformation it applied:
//!
//! 1. parse the text as JSON, or extract the JSON values embedded in it and
//!    try each in turn
//! 2. deserialize directly
//! 3. fix the top-level shape (wrap a bare list, or unwrap a single-list object)
//! 4. decode nested fields that arrived as JSON-encoded strings, then retry 2-3
//!
//! When nothing works the caller gets a [`SchemaMismatchError`] holding the raw
//! text and the attempted path. A partially populated record is never returned.

mod extract;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub use extract::extract_candidates;

/// Top-level shape the target type deserializes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    /// A JSON object. `list_field` names the single list field a bare array
    /// should be wrapped into, if any.
    Object {
        /// Field that receives a bare top-level array.
        list_field: Option<&'static str>,
    },
    /// A JSON array.
    List,
}

impl ExpectedShape {
    /// An object with no list field to wrap into.
    pub const fn object() -> Self {
        Self::Object { list_field: None }
    }

    /// An object whose only list field is `field`.
    pub const fn object_with_list(field: &'static str) -> Self {
        Self::Object { list_field: Some(field) }
    }

    /// Whether `value` already has this top-level kind.
    fn fits(self, value: &Value) -> bool {
        match self {
            Self::Object { .. } => value.is_object(),
            Self::List => value.is_array(),
        }
    }
}

/// One transformation applied while coercing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CoercionStep {
    /// Deserialized the value as parsed.
    Direct,
    /// Pulled the JSON value out of surrounding prose or code fences.
    ExtractedFromText,
    /// Wrapped a bare array into `{field: [...]}`.
    WrappedList {
        /// Target field.
        field: String,
    },
    /// Replaced `{field: [...]}` by its array.
    UnwrappedList {
        /// Source field.
        field: String,
    },
    /// Parsed fields holding JSON-encoded strings into native values.
    DecodedStringFields {
        /// JSON-pointer-like paths of the decoded fields.
        fields: Vec<String>,
    },
}

impl fmt::Display for CoercionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::ExtractedFromText => write!(f, "extracted from text"),
            Self::WrappedList { field } => write!(f, "wrapped list into '{}'", field),
            Self::UnwrappedList { field } => write!(f, "unwrapped list from '{}'", field),
            Self::DecodedStringFields { fields } => {
                write!(f, "decoded string fields [{}]", fields.join(", "))
            }
        }
    }
}

/// Model output that could not be coerced into the requested type.
#[derive(Error, Debug, Clone)]
#[error("Schema mismatch for {target}: {reason}")]
pub struct SchemaMismatchError {
    /// Raw model text, kept for offline reproduction.
    pub raw: String,
    /// Name of the target type.
    pub target: String,
    /// Transformations attempted, in order.
    pub attempts: Vec<CoercionStep>,
    /// Last validation failure.
    pub reason: String,
}

/// A successfully coerced value and the path that produced it.
#[derive(Debug, Clone)]
pub struct Coerced<T> {
    /// Typed value.
    pub value: T,
    /// Transformations applied, ending with the one that succeeded.
    pub path: Vec<CoercionStep>,
}

/// Coerces raw model text into `T`.
///
/// # Errors
/// Returns [`SchemaMismatchError`] when no recovery produces a valid `T`.
pub fn coerce<T: DeserializeOwned>(
    raw: &str,
    shape: ExpectedShape,
) -> Result<Coerced<T>, SchemaMismatchError> {
    let target = short_type_name::<T>();

    let parse_error = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => {
            let mut path = Vec::new();
            return match coerce_value::<T>(value, shape, &mut path) {
                Ok(value) => {
                    debug!(target = %target, path = ?path, "Coerced model output");
                    Ok(Coerced { value, path })
                }
                Err(reason) => {
                    debug!(target = %target, attempts = ?path, reason = %reason, "Coercion failed");
                    Err(SchemaMismatchError { raw: raw.to_string(), target, attempts: path, reason })
                }
            };
        }
        Err(e) => e,
    };

    let candidates = extract_candidates(raw);
    if candidates.is_empty() {
        return Err(SchemaMismatchError {
            raw: raw.to_string(),
            target,
            attempts: vec![CoercionStep::ExtractedFromText],
            reason: format!("no JSON value found: {}", parse_error),
        });
    }

    // A failing candidate of the expected kind gives the reported reason.
    let mut attempts = Vec::new();
    let mut best: Option<(bool, String)> = None;
    for candidate in candidates {
        let fits = shape.fits(&candidate);
        let mut path = vec![CoercionStep::ExtractedFromText];
        match coerce_value::<T>(candidate, shape, &mut path) {
            Ok(value) => {
                debug!(target = %target, path = ?path, "Coerced model output");
                return Ok(Coerced { value, path });
            }
            Err(reason) => {
                attempts.extend(path);
                if best.as_ref().is_none_or(|(best_fits, _)| fits && !*best_fits) {
                    best = Some((fits, reason));
                }
            }
        }
    }

    let reason = best.map(|(_, reason)| reason).unwrap_or_default();
    debug!(target = %target, attempts = ?attempts, reason = %reason, "Coercion failed");
    Err(SchemaMismatchError { raw: raw.to_string(), target, attempts, reason })
}

/// Coerces an already parsed value into `T`.
///
/// # Errors
/// Returns [`SchemaMismatchError`] when no recovery produces a valid `T`; its
/// `raw` field holds the value's JSON text.
pub fn coerce_value_into<T: DeserializeOwned>(
    value: Value,
    shape: ExpectedShape,
) -> Result<Coerced<T>, SchemaMismatchError> {
    let raw = value.to_string();
    let mut path = Vec::new();
    match coerce_value::<T>(value, shape, &mut path) {
        Ok(value) => Ok(Coerced { value, path }),
        Err(reason) => Err(SchemaMismatchError {
            raw,
            target: short_type_name::<T>(),
            attempts: path,
            reason,
        }),
    }
}

fn coerce_value<T: DeserializeOwned>(
    value: Value,
    shape: ExpectedShape,
    path: &mut Vec<CoercionStep>,
) -> Result<T, String> {
    path.push(CoercionStep::Direct);
    let mut last_error = match serde_json::from_value::<T>(value.clone()) {
        Ok(typed) => return Ok(typed),
        Err(e) => e.to_string(),
    };

    if let Some((fixed, step)) = fix_shape(&value, shape) {
        path.push(step);
        match serde_json::from_value::<T>(fixed) {
            Ok(typed) => return Ok(typed),
            Err(e) => last_error = e.to_string(),
        }
    }

    let mut fields = Vec::new();
    let decoded = decode_string_fields(value, "$", &mut fields);
    if fields.is_empty() {
        return Err(last_error);
    }
    path.push(CoercionStep::DecodedStringFields { fields });

    match serde_json::from_value::<T>(decoded.clone()) {
        Ok(typed) => return Ok(typed),
        Err(e) => last_error = e.to_string(),
    }

    if let Some((fixed, step)) = fix_shape(&decoded, shape) {
        path.push(step);
        match serde_json::from_value::<T>(fixed) {
            Ok(typed) => return Ok(typed),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(last_error)
}

fn fix_shape(value: &Value, shape: ExpectedShape) -> Option<(Value, CoercionStep)> {
    match (shape, value) {
        (ExpectedShape::Object { list_field: Some(field) }, Value::Array(_)) => {
            let mut object = Map::new();
            object.insert(field.to_string(), value.clone());
            Some((Value::Object(object), CoercionStep::WrappedList { field: field.to_string() }))
        }
        (ExpectedShape::List, Value::Object(object)) => {
            let mut lists = object.iter().filter(|(_, v)| v.is_array());
            let (field, list) = lists.next()?;
            if lists.next().is_some() {
                return None;
            }
            Some((list.clone(), CoercionStep::UnwrappedList { field: field.clone() }))
        }
        _ => None,
    }
}

/// Replaces strings that hold a JSON object or array with the parsed value.
fn decode_string_fields(value: Value, at: &str, decoded: &mut Vec<String>) -> Value {
    match value {
        Value::String(text) => match parse_structured(&text) {
            Some(inner) => {
                decoded.push(at.to_string());
                decode_string_fields(inner, at, decoded)
            }
            None => Value::String(text),
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| decode_string_fields(item, &format!("{}[{}]", at, i), decoded))
                .collect(),
        ),
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, item)| {
                    let child = format!("{}.{}", at, key);
                    let item = decode_string_fields(item, &child, decoded);
                    (key, item)
                })
                .collect(),
        ),
        other => other,
    }
}

fn parse_structured(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(trimmed).ok().filter(|v| v.is_object() || v.is_array())
}

fn short_type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
