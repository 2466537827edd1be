// src/infra/errors.rs — Error types for stimgen

use thiserror::Error;

use crate::client::ClientError;

#[derive(Error, Debug)]
pub enum StimgenError {
    // Model client errors that escaped the agent layer (fatal ones only)
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Unsupported model choice: {0}")]
    UnsupportedModel(String),

    #[error("Invalid run settings: {0}")]
    InvalidSettings(String),

    #[error("Iteration {iteration} gave up after {attempts} regenerations")]
    RegenerationLimit { iteration: usize, attempts: u32 },

    // Session registry
    #[error("Session '{run_id}' error: {message}")]
    Session { run_id: String, message: String },

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StimgenError {
    /// Errors caused by the caller's request rather than the pipeline.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StimgenError::UnsupportedModel(_) | StimgenError::InvalidSettings(_)
        )
    }
}
