// src/client/custom.rs — User-supplied OpenAI-compatible endpoint
//
// Used for self-hosted gateways and third-party hosts. Endpoints that cannot
// honour `json_schema` response formats (DeepSeek) get `json_object` plus an
// explicit field list in the prompt instead.

use async_trait::async_trait;

use super::openai::{extract_content, post_chat};
use super::structured::parse_structured;
use super::{ClientError, CompletionParams, FieldSchema, JsonObject, ModelClient};

const DEEPSEEK_PREFIX: &str = "https://api.deepseek.com";

pub struct CustomClient {
    api_url: String,
    api_key: String,
    model_name: String,
    client: reqwest::Client,
}

impl CustomClient {
    pub fn new(api_url: String, api_key: String, model_name: String) -> Self {
        Self {
            api_url,
            api_key,
            model_name,
            client: reqwest::Client::new(),
        }
    }

    fn is_json_object_only(&self) -> bool {
        self.api_url.trim().starts_with(DEEPSEEK_PREFIX)
    }

    pub(crate) fn build_request_body(
        &self,
        prompt: &str,
        schema: &FieldSchema,
        params: Option<&CompletionParams>,
    ) -> serde_json::Value {
        let mut body = if self.is_json_object_only() {
            let prompt = format!(
                "{}\n{}",
                prompt.trim_end(),
                field_instructions(schema)
            );
            serde_json::json!({
                "model": self.model_name,
                "messages": [
                    // Nonce defeats response caching on identical prompts.
                    {"role": "system", "content": format!("RAND:{}", chrono::Utc::now().timestamp())},
                    {"role": "user", "content": prompt},
                ],
                "stream": false,
                "response_format": {"type": "json_object"},
            })
        } else {
            serde_json::json!({
                "model": self.model_name,
                "messages": [{"role": "user", "content": prompt}],
                "stream": false,
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {
                        "name": "response_schema",
                        "schema": schema.to_json_schema(),
                    }
                }
            })
        };

        // Caller parameters override the request body key by key.
        if let Some(params) = params {
            if let Ok(serde_json::Value::Object(overrides)) = serde_json::to_value(params) {
                for (k, v) in overrides {
                    body[k.as_str()] = v;
                }
            }
        }
        body
    }
}

/// Plain-language field contract for endpoints without schema enforcement.
fn field_instructions(schema: &FieldSchema) -> String {
    let names: Vec<String> = schema.field_names().map(|n| format!("\"{n}\"")).collect();
    format!(
        "Return strictly valid JSON. Required fields: {}. Field requirements: {}",
        names.join(", "),
        serde_json::Value::Object(schema.0.clone())
    )
}

#[async_trait]
impl ModelClient for CustomClient {
    fn id(&self) -> &str {
        "custom"
    }

    fn default_params(&self) -> CompletionParams {
        CompletionParams::with_model(self.model_name.clone())
    }

    async fn generate_completion(
        &self,
        prompt: &str,
        schema: &FieldSchema,
        params: Option<&CompletionParams>,
    ) -> Result<JsonObject, ClientError> {
        let body = self.build_request_body(prompt, schema, params);
        tracing::debug!(url = %self.api_url, model = %self.model_name, "Sending request to custom endpoint");

        let resp = post_chat(&self.client, &self.api_url, &self.api_key, &body).await?;
        parse_structured(extract_content(&resp)?, schema)
    }
}
