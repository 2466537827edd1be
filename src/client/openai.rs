// src/client/openai.rs — OpenAI Chat Completions backend (structured output)

use async_trait::async_trait;

use super::structured::parse_structured;
use super::{ClientError, CompletionParams, FieldSchema, JsonObject, ModelClient};
use crate::util::truncate_str;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
pub(crate) const MAX_ERROR_BODY: usize = 2_000;

pub struct OpenAIClient {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(api_key: String) -> Self {
        if api_key.is_empty() {
            tracing::warn!("No OpenAI API key provided; requests will be rejected");
        }
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.into(),
        }
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

/// Build the `/chat/completions` body with a strict `json_schema` response format.
pub(crate) fn build_request_body(
    prompt: &str,
    schema: &FieldSchema,
    params: &CompletionParams,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": params.model.as_deref().unwrap_or(DEFAULT_MODEL),
        "messages": [{"role": "user", "content": prompt}],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": "response_schema",
                "schema": schema.to_json_schema(),
            }
        }
    });

    if let Some(temp) = params.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if let Some(max_tokens) = params.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    for (k, v) in &params.extra {
        body[k.as_str()] = v.clone();
    }
    body
}

/// Pull `choices[0].message.content` out of a chat completion response.
pub(crate) fn extract_content(resp: &serde_json::Value) -> Result<&str, ClientError> {
    resp["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ClientError::Parse {
            message: "response has no choices[0].message.content".into(),
        })
}

/// Shared POST + status mapping for OpenAI-style endpoints.
pub(crate) async fn post_chat(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value, ClientError> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .json(body)
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

    response.json().await.map_err(|e| ClientError::Parse {
        message: format!("response body is not JSON: {e}"),
    })
}

#[async_trait]
impl ModelClient for OpenAIClient {
    fn id(&self) -> &str {
        "openai"
    }

    fn default_params(&self) -> CompletionParams {
        CompletionParams::with_model(DEFAULT_MODEL)
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
        let body = build_request_body(prompt, schema, &params);

        let url = format!("{}/chat/completions", self.base_url);
        let resp = post_chat(&self.client, &url, &self.api_key, &body).await?;
        parse_structured(extract_content(&resp)?, schema)
    }
}
