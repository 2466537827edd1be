// src/client/mod.rs — Model client layer
//
// Every backend answers one question: given a prompt and the set of fields
// the answer must contain, return a JSON object or a typed error. Backends
// never panic or raise across this boundary; the pipeline treats them all
// the same way.

pub mod custom;
pub mod factory;
pub mod isolate;
pub mod ollama;
pub mod openai;
pub mod retry;
pub mod structured;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use factory::{create_model_client, BackendSettings, ModelChoice};

/// A decoded JSON object, the unit every stage exchanges with a backend.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Core trait that all model backends implement.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn id(&self) -> &str;

    /// Model-appropriate defaults (model identifier, temperature, token budget).
    fn default_params(&self) -> CompletionParams;

    /// Submit `prompt` and require the answer to carry every field of `schema`.
    async fn generate_completion(
        &self,
        prompt: &str,
        schema: &FieldSchema,
        params: Option<&CompletionParams>,
    ) -> Result<JsonObject, ClientError>;
}

/// Required-field schema: field name → JSON-schema fragment for that field.
///
/// An empty schema means "no specific constraints", not "reject everything".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSchema(pub JsonObject);

impl FieldSchema {
    pub fn new(fields: JsonObject) -> Self {
        Self(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// The strict object schema sent to backends that support structured output.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let required: Vec<&str> = self.field_names().collect();
        serde_json::json!({
            "type": "object",
            "properties": self.0,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Invocation parameters. Unknown keys pass through to the request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl CompletionParams {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    /// Judging stages run at the minimum temperature.
    pub fn deterministic(mut self) -> Self {
        self.temperature = Some(0.0);
        self
    }

    /// Fill every unset field of `self` from `base`.
    pub fn or_defaults(mut self, base: &CompletionParams) -> Self {
        if self.model.is_none() {
            self.model = base.model.clone();
        }
        if self.temperature.is_none() {
            self.temperature = base.temperature;
        }
        if self.max_tokens.is_none() {
            self.max_tokens = base.max_tokens;
        }
        for (k, v) in &base.extra {
            self.extra.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Model call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to parse response: {message}")]
    Parse { message: String },

    #[error("Isolated call failed: {message}")]
    Isolation { message: String },

    #[error("Fatal model client error: {message}")]
    Fatal { message: String },
}

impl ClientError {
    /// Transient failures the retry layer should try again.
    pub fn is_retriable(&self) -> bool {
        match self {
            ClientError::Timeout { .. }
            | ClientError::Transport { .. }
            | ClientError::Isolation { .. } => true,
            ClientError::Http { status, .. } => *status == 429 || *status >= 500,
            ClientError::Parse { .. } | ClientError::Fatal { .. } => false,
        }
    }

    /// Failures that no amount of regeneration can fix.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Fatal { .. } => true,
            ClientError::Http { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // The isolation layer owns the real deadline; report what reqwest saw.
            ClientError::Transport {
                message: format!("request timed out: {e}"),
            }
        } else {
            ClientError::Transport {
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(v: serde_json::Value) -> FieldSchema {
        FieldSchema(v.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_field_schema_to_json_schema() {
        let s = schema(json!({
            "word": {"type": "string"},
            "frequency": {"type": "number"},
        }));
        let js = s.to_json_schema();
        assert_eq!(js["type"], "object");
        assert_eq!(js["additionalProperties"], false);
        let required: Vec<&str> = js["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"word"));
        assert!(required.contains(&"frequency"));
    }

    #[test]
    fn test_empty_schema_has_no_required_fields() {
        let js = FieldSchema::default().to_json_schema();
        assert_eq!(js["required"], json!([]));
    }

    #[test]
    fn test_params_deterministic_overrides_temperature() {
        let p = CompletionParams {
            temperature: Some(0.9),
            ..CompletionParams::with_model("gpt-4o")
        }
        .deterministic();
        assert_eq!(p.temperature, Some(0.0));
        assert_eq!(p.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_params_or_defaults_keeps_explicit_values() {
        let base = CompletionParams {
            model: Some("base".into()),
            temperature: Some(0.7),
            max_tokens: Some(200),
            extra: json!({"top_p": 0.9}).as_object().cloned().unwrap(),
        };
        let p = CompletionParams {
            model: Some("mine".into()),
            ..Default::default()
        }
        .or_defaults(&base);
        assert_eq!(p.model.as_deref(), Some("mine"));
        assert_eq!(p.temperature, Some(0.7));
        assert_eq!(p.max_tokens, Some(200));
        assert_eq!(p.extra["top_p"], json!(0.9));
    }

    #[test]
    fn test_params_flatten_extra_keys() {
        let p: CompletionParams =
            serde_json::from_value(json!({"model": "m", "top_p": 0.5, "seed": 7})).unwrap();
        assert_eq!(p.model.as_deref(), Some("m"));
        assert_eq!(p.extra.len(), 2);
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["seed"], json!(7));
        assert!(back.get("temperature").is_none());
    }

    #[test]
    fn test_error_retriable_classification() {
        assert!(ClientError::Timeout { seconds: 60 }.is_retriable());
        assert!(ClientError::Transport {
            message: "reset".into()
        }
        .is_retriable());
        assert!(ClientError::Http {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(ClientError::Http {
            status: 429,
            body: String::new()
        }
        .is_retriable());
        assert!(!ClientError::Http {
            status: 400,
            body: String::new()
        }
        .is_retriable());
        assert!(!ClientError::Parse {
            message: "x".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_error_fatal_classification() {
        assert!(ClientError::Fatal {
            message: "x".into()
        }
        .is_fatal());
        assert!(ClientError::Http {
            status: 401,
            body: String::new()
        }
        .is_fatal());
        assert!(!ClientError::Timeout { seconds: 1 }.is_fatal());
    }
}
