// src/client/ollama.rs — Ollama local model backend

use async_trait::async_trait;

use super::structured::parse_structured;
use super::{ClientError, CompletionParams, FieldSchema, JsonObject, ModelClient};
use super::openai::MAX_ERROR_BODY;
use crate::util::truncate_str;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.3";

pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.into()),
            client: reqwest::Client::new(),
        }
    }

    pub(crate) fn build_request_body(
        &self,
        prompt: &str,
        schema: &FieldSchema,
        params: &CompletionParams,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": params.model.as_deref().unwrap_or(&self.model),
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
            // Ollama accepts a JSON schema directly as the output format.
            "format": schema.to_json_schema(),
        });

        let mut options = serde_json::Map::new();
        if let Some(temp) = params.temperature {
            options.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max_tokens) = params.max_tokens {
            options.insert("num_predict".into(), serde_json::json!(max_tokens));
        }
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }
        body
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn id(&self) -> &str {
        "ollama"
    }

    fn default_params(&self) -> CompletionParams {
        CompletionParams::with_model(self.model.clone())
    }

    async fn generate_completion(
        &self,
        prompt: &str,
        schema: &FieldSchema,
        params: Option<&CompletionParams>,
    ) -> Result<JsonObject, ClientError> {
        let params = params
            .cloned()
            .unwrap_or_default()
            .or_defaults(&self.default_params());
        let body = self.build_request_body(prompt, schema, &params);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body: truncate_str(&error_body, MAX_ERROR_BODY).to_string(),
            });
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| ClientError::Parse {
            message: format!("response body is not JSON: {e}"),
        })?;

        let content = resp["message"]["content"]
            .as_str()
            .ok_or_else(|| ClientError::Parse {
                message: "response has no message.content".into(),
            })?;
        parse_structured(content, schema)
    }
}
