// src/pipeline/agents.rs — Generate / validate / score stages
//
// Each stage wraps one model call: cancellation check, prompt, call,
// cancellation check. Recoverable client errors become `Stage::Failed`;
// only fatal ones leave as `Err`.

use std::sync::Arc;

use super::cancel::CancelFlag;
use super::prompts::Prompts;
use super::types::{ScoreResult, Stimulus, ValidationResult};
use crate::client::{ClientError, CompletionParams, FieldSchema, JsonObject, ModelClient};
use crate::infra::errors::StimgenError;

/// Result of one stage call.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage<T> {
    Ready(T),
    /// The backend failed in a way a fresh attempt may fix.
    Failed(String),
    /// The cancellation flag was observed before or after the call.
    Cancelled,
}

impl<T> Stage<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Stage::Cancelled)
    }
}

pub struct Agents {
    client: Arc<dyn ModelClient>,
    prompts: Prompts,
    cancel: CancelFlag,
}

impl Agents {
    pub fn new(client: Arc<dyn ModelClient>, cancel: CancelFlag) -> Result<Self, StimgenError> {
        Ok(Self {
            client,
            prompts: Prompts::new()?,
            cancel,
        })
    }

    pub fn client_id(&self) -> &str {
        self.client.id()
    }

    /// Stage 1: propose a stimulus that differs from `previous`.
    pub async fn generate(
        &self,
        design: &str,
        previous: &[Stimulus],
        schema: &FieldSchema,
        params: Option<&CompletionParams>,
    ) -> Result<Stage<Stimulus>, StimgenError> {
        if self.cancel.is_set() {
            return Ok(Stage::Cancelled);
        }
        let prompt = self.prompts.generate(design, previous)?;
        let result = self.client.generate_completion(&prompt, schema, params).await;
        Ok(self.finish(result, "generate")?.map_ready(|fields| {
            if fields.is_empty() {
                Stage::Failed("model returned an empty stimulus".into())
            } else {
                Stage::Ready(Stimulus::new(fields))
            }
        }))
    }

    /// Stage 2: judge a candidate against the design. Runs deterministically.
    pub async fn validate(
        &self,
        design: &str,
        candidate: &Stimulus,
        schema: &FieldSchema,
    ) -> Result<Stage<ValidationResult>, StimgenError> {
        if self.cancel.is_set() {
            return Ok(Stage::Cancelled);
        }
        let prompt = self.prompts.validate(design, candidate)?;
        let params = self.judging_params();
        let result = self
            .client
            .generate_completion(&prompt, schema, Some(&params))
            .await;
        Ok(self
            .finish(result, "validate")?
            .map_ready(|fields| Stage::Ready(ValidationResult(fields))))
    }

    /// Stage 3: rate an accepted stimulus. Runs deterministically.
    pub async fn score(
        &self,
        design: &str,
        accepted: &Stimulus,
        schema: &FieldSchema,
    ) -> Result<Stage<ScoreResult>, StimgenError> {
        if self.cancel.is_set() {
            return Ok(Stage::Cancelled);
        }
        let prompt = self.prompts.score(design, accepted)?;
        let params = self.judging_params();
        let result = self
            .client
            .generate_completion(&prompt, schema, Some(&params))
            .await;
        Ok(self
            .finish(result, "score")?
            .map_ready(|fields| Stage::Ready(ScoreResult(fields))))
    }

    fn judging_params(&self) -> CompletionParams {
        self.client.default_params().deterministic()
    }

    /// Shared post-call handling: cancellation wins, fatal errors escape,
    /// everything else becomes a stage failure.
    fn finish(
        &self,
        result: Result<JsonObject, ClientError>,
        stage: &'static str,
    ) -> Result<Stage<JsonObject>, StimgenError> {
        if self.cancel.is_set() {
            return Ok(Stage::Cancelled);
        }
        match result {
            Ok(fields) => Ok(Stage::Ready(fields)),
            Err(e) if e.is_fatal() => {
                tracing::error!(stage, client = self.client.id(), "Fatal model error: {}", e);
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!(stage, client = self.client.id(), "Model call failed: {}", e);
                Ok(Stage::Failed(e.to_string()))
            }
        }
    }
}

impl Stage<JsonObject> {
    fn map_ready<U>(self, f: impl FnOnce(JsonObject) -> Stage<U>) -> Stage<U> {
        match self {
            Stage::Ready(fields) => f(fields),
            Stage::Failed(reason) => Stage::Failed(reason),
            Stage::Cancelled => Stage::Cancelled,
        }
    }
}
