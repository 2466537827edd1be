// src/client/retry.rs — Retry with exponential backoff for model clients
//
// Wraps any ModelClient so that each attempt runs inside a bounded-time
// isolated call. Retries: timeouts, transport failures, 429 and 5xx.
// Does NOT retry: parse failures, other 4xx, fatal errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::isolate;
use super::{ClientError, CompletionParams, FieldSchema, JsonObject, ModelClient};
use crate::infra::config::ClientConfig;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    /// Hard wall-clock limit per attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for RetryConfig {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.initial_backoff_ms),
            backoff_factor: cfg.backoff_factor,
            attempt_timeout: Duration::from_secs(cfg.timeout_seconds),
        }
    }
}

/// A client wrapper that adds isolation, a deadline and retries.
pub struct RetryClient {
    inner: Arc<dyn ModelClient>,
    config: RetryConfig,
}

impl RetryClient {
    pub fn new(inner: Arc<dyn ModelClient>) -> Self {
        Self {
            inner,
            config: RetryConfig::default(),
        }
    }

    pub fn with_config(inner: Arc<dyn ModelClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Delay before retry number `attempt` (0-indexed): 1s, 2s, 4s, ...
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_factor.powi(attempt as i32);
        Duration::from_millis(ms as u64)
    }
}

#[async_trait]
impl ModelClient for RetryClient {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn default_params(&self) -> CompletionParams {
        self.inner.default_params()
    }

    async fn generate_completion(
        &self,
        prompt: &str,
        schema: &FieldSchema,
        params: Option<&CompletionParams>,
    ) -> Result<JsonObject, ClientError> {
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts {
            let inner = self.inner.clone();
            let prompt = prompt.to_string();
            let schema = schema.clone();
            let params = params.cloned();

            let result = isolate::bounded(self.config.attempt_timeout, async move {
                inner
                    .generate_completion(&prompt, &schema, params.as_ref())
                    .await
            })
            .await;

            match result {
                Ok(object) => return Ok(object),
                Err(e) => {
                    if !e.is_retriable() || attempt + 1 == self.config.max_attempts {
                        if e.is_retriable() {
                            tracing::warn!(
                                client = self.inner.id(),
                                attempts = attempt + 1,
                                "Giving up after error: {}",
                                e
                            );
                        }
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        client = self.inner.id(),
                        attempt = attempt + 1,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );

                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::Fatal {
            message: "no attempts were made".into(),
        }))
    }
}
