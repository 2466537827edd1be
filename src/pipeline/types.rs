// src/pipeline/types.rs — Pipeline domain types

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{BackendSettings, CompletionParams, FieldSchema, JsonObject, ModelChoice};
use crate::infra::errors::StimgenError;

/// One generated experimental item: dimension name → value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stimulus(pub JsonObject);

impl Stimulus {
    pub fn new(fields: JsonObject) -> Self {
        Self(fields)
    }

    pub fn get(&self, dimension: &str) -> Option<&Value> {
        self.0.get(dimension)
    }

    /// String form of a dimension, used for comparison.
    pub fn text(&self, dimension: &str) -> Option<String> {
        self.0.get(dimension).map(value_text)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_default()
    }
}

/// Strings compare by content; every other JSON value by its serialized form.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON truthiness, extended to the textual negatives models like to emit.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => {
            let s = s.trim();
            !(s.is_empty()
                || s.eq_ignore_ascii_case("false")
                || s.eq_ignore_ascii_case("no")
                || s == "0")
        }
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// The validator's verdict on a candidate: requirement field → pass/fail signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationResult(pub JsonObject);

impl ValidationResult {
    /// Fields whose signal is falsy, sorted by name.
    pub fn failed_fields(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, v)| !is_truthy(v))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Every field must be truthy; an empty verdict passes.
    pub fn passed(&self) -> bool {
        self.0.values().all(is_truthy)
    }
}

/// Score dimension → numeric value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreResult(pub JsonObject);

impl ScoreResult {
    /// Fallback used when the scorer fails: every schema dimension scored 0.
    pub fn zeroed(schema: &FieldSchema) -> Self {
        Self(
            schema
                .field_names()
                .map(|name| (name.to_string(), Value::from(0)))
                .collect(),
        )
    }
}

/// Stage switches for ablation studies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ablation {
    #[serde(default = "default_true", alias = "use_agent_2", alias = "useValidator")]
    pub use_validator: bool,
    #[serde(default = "default_true", alias = "use_agent_3", alias = "useScorer")]
    pub use_scorer: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Ablation {
    fn default() -> Self {
        Self {
            use_validator: true,
            use_scorer: true,
        }
    }
}

/// Everything one run needs. Immutable once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub run_id: String,
    pub experiment_design: String,
    pub iterations: usize,
    pub model_choice: ModelChoice,
    #[serde(default)]
    pub generator_schema: FieldSchema,
    #[serde(default)]
    pub validator_schema: FieldSchema,
    #[serde(default)]
    pub scorer_schema: FieldSchema,
    #[serde(default)]
    pub previous_stimuli: Vec<Stimulus>,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub params: Option<CompletionParams>,
    #[serde(default)]
    pub ablation: Ablation,
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), StimgenError> {
        if self.iterations == 0 {
            return Err(StimgenError::InvalidSettings(
                "iteration count must be a positive integer".into(),
            ));
        }
        if self.experiment_design.trim().is_empty() {
            return Err(StimgenError::InvalidSettings(
                "experiment design must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Named output channels for the run narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogChannel {
    Generator,
    Validator,
    Scorer,
    Setup,
    All,
    Error,
}

impl fmt::Display for LogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogChannel::Generator => "generator",
            LogChannel::Validator => "validator",
            LogChannel::Scorer => "scorer",
            LogChannel::Setup => "setup",
            LogChannel::All => "all",
            LogChannel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One accepted iteration. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub stimulus_id: usize,
    pub stimulus: Stimulus,
    pub repetition_count: u32,
    pub validation_fails: u32,
    pub validation: ValidationResult,
    /// Absent when the scorer is disabled.
    pub scores: Option<ScoreResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Complete,
    Cancelled,
    Error { message: String },
}

/// A materialized result table plus the metadata that travels with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub records: Vec<RunRecord>,
    pub status: ArtifactStatus,
    /// Unix seconds.
    pub generation_timestamp: i64,
    pub batch_id: String,
    pub total_iterations: usize,
}

impl Artifact {
    pub fn new(run_id: &str, records: Vec<RunRecord>, total_iterations: usize) -> Self {
        let generation_timestamp = Utc::now().timestamp();
        let batch_id = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        Self {
            name: format!(
                "experiment_stimuli_results_{}_{}_{}.csv",
                run_id, generation_timestamp, batch_id
            ),
            records,
            status: ArtifactStatus::Complete,
            generation_timestamp,
            batch_id,
            total_iterations,
        }
    }

    pub fn with_status(mut self, status: ArtifactStatus) -> Self {
        self.status = status;
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            ArtifactStatus::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Artifact names embed the run identifier for provenance checks.
    pub fn belongs_to(&self, run_id: &str) -> bool {
        !run_id.is_empty() && self.name.contains(run_id)
    }
}

/// How a run ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Cancelled before any record was accepted.
    Stopped,
    Artifact(Artifact),
}

impl RunOutcome {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            RunOutcome::Stopped => None,
            RunOutcome::Artifact(a) => Some(a),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Completed => "completed",
            RunPhase::Stopped => "stopped",
            RunPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> JsonObject {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!(["x"])));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!("False")));
        assert!(!is_truthy(&json!(" no ")));
        assert!(!is_truthy(&json!({})));
    }

    #[test]
    fn test_validation_failed_fields() {
        let v = ValidationResult(obj(json!({
            "grammatical": true,
            "plausible": false,
            "length_ok": "no",
        })));
        assert!(!v.passed());
        assert_eq!(v.failed_fields(), vec!["length_ok", "plausible"]);
    }

    #[test]
    fn test_empty_validation_passes() {
        assert!(ValidationResult::default().passed());
    }

    #[test]
    fn test_zeroed_scores() {
        let schema = FieldSchema(obj(json!({
            "naturalness": {"type": "number"},
            "clarity": {"type": "number"},
        })));
        let s = ScoreResult::zeroed(&schema);
        assert_eq!(s.0.len(), 2);
        assert!(s.0.values().all(|v| *v == json!(0)));
    }

    #[test]
    fn test_stimulus_text() {
        let s = Stimulus(obj(json!({"word": "Cat", "length": 3})));
        assert_eq!(s.text("word").as_deref(), Some("Cat"));
        assert_eq!(s.text("length").as_deref(), Some("3"));
        assert!(s.text("missing").is_none());
    }

    #[test]
    fn test_ablation_aliases() {
        let a: Ablation = serde_json::from_value(json!({"use_agent_2": false})).unwrap();
        assert!(!a.use_validator);
        assert!(a.use_scorer);
    }

    #[test]
    fn test_artifact_name_embeds_run_id() {
        let a = Artifact::new("run-42", vec![], 3);
        assert!(a.name.starts_with("experiment_stimuli_results_run-42_"));
        assert!(a.name.ends_with(".csv"));
        assert_eq!(a.batch_id.len(), 6);
        assert!(a.batch_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(a.belongs_to("run-42"));
        assert!(!a.belongs_to("run-7"));
        assert_eq!(a.status, ArtifactStatus::Complete);
    }

    #[test]
    fn test_settings_validation() {
        let mut s = RunSettings {
            run_id: "r".into(),
            experiment_design: "words".into(),
            iterations: 0,
            model_choice: ModelChoice::Gpt4o,
            generator_schema: FieldSchema::default(),
            validator_schema: FieldSchema::default(),
            scorer_schema: FieldSchema::default(),
            previous_stimuli: vec![],
            backend: BackendSettings::default(),
            params: None,
            ablation: Ablation::default(),
        };
        assert!(s.validate().is_err());
        s.iterations = 2;
        assert!(s.validate().is_ok());
        s.experiment_design = "  ".into();
        assert!(s.validate().is_err());
    }
}
