// src/client/factory.rs — Backend selection
//
// The model selector string is resolved exactly once, here. Everything
// downstream holds an `Arc<dyn ModelClient>` already wrapped in retries.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::custom::CustomClient;
use super::ollama::OllamaClient;
use super::openai::OpenAIClient;
use super::retry::{RetryClient, RetryConfig};
use super::ModelClient;
use crate::infra::config::ClientConfig;
use crate::infra::errors::StimgenError;

/// Which backend a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelChoice {
    #[serde(rename = "GPT-4o")]
    Gpt4o,
    #[serde(rename = "custom")]
    Custom,
    #[serde(rename = "ollama")]
    Ollama,
}

impl ModelChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelChoice::Gpt4o => "GPT-4o",
            ModelChoice::Custom => "custom",
            ModelChoice::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelChoice {
    type Err = StimgenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "GPT-4o" | "gpt-4o" | "openai" => Ok(ModelChoice::Gpt4o),
            "custom" => Ok(ModelChoice::Custom),
            "ollama" => Ok(ModelChoice::Ollama),
            other => Err(StimgenError::UnsupportedModel(other.to_string())),
        }
    }
}

/// Per-backend credentials and endpoint overrides supplied with a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
}

impl BackendSettings {
    fn non_empty(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }
}

/// Build the backend for `choice`, wrapped in isolation and retries.
pub fn create_model_client(
    choice: ModelChoice,
    settings: &BackendSettings,
    config: &ClientConfig,
) -> Result<Arc<dyn ModelClient>, StimgenError> {
    let backend: Arc<dyn ModelClient> = match choice {
        ModelChoice::Gpt4o => {
            let key = BackendSettings::non_empty(&settings.api_key)
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .unwrap_or_default();
            match BackendSettings::non_empty(&settings.api_url) {
                Some(url) => Arc::new(OpenAIClient::with_base_url(key, url)),
                None => Arc::new(OpenAIClient::new(key)),
            }
        }
        ModelChoice::Custom => {
            let api_url = BackendSettings::non_empty(&settings.api_url).ok_or_else(|| {
                StimgenError::InvalidSettings("custom model requires an API URL".into())
            })?;
            let model_name = BackendSettings::non_empty(&settings.model_name).ok_or_else(|| {
                StimgenError::InvalidSettings("custom model requires a model name".into())
            })?;
            let api_key = BackendSettings::non_empty(&settings.api_key).unwrap_or_default();
            Arc::new(CustomClient::new(api_url, api_key, model_name))
        }
        ModelChoice::Ollama => Arc::new(OllamaClient::new(
            BackendSettings::non_empty(&settings.api_url),
            BackendSettings::non_empty(&settings.model_name),
        )),
    };

    tracing::debug!(backend = backend.id(), choice = %choice, "Created model client");
    Ok(Arc::new(RetryClient::with_config(
        backend,
        RetryConfig::from(config),
    )))
}
