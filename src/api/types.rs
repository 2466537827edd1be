// src/api/types.rs

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{BackendSettings, CompletionParams, FieldSchema, ModelChoice};
use crate::pipeline::{Ablation, RunSettings, Stimulus};

/// Body of `POST /api/v1/runs/{run_id}/generate`.
///
/// Property schemas, previous stimuli and params may arrive either as JSON
/// values or as JSON-encoded strings (what browser forms tend to send).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub experiment_design: Option<String>,
    #[serde(default)]
    pub iteration: Option<Value>,
    #[serde(default)]
    pub model_choice: Option<String>,
    #[serde(default)]
    pub agent1_properties: Option<Value>,
    #[serde(default)]
    pub agent2_properties: Option<Value>,
    #[serde(default)]
    pub agent3_properties: Option<Value>,
    #[serde(default)]
    pub previous_stimuli: Option<Value>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub ablation: Option<Value>,
}

impl GenerateRequest {
    /// Check the request and turn it into run settings for `run_id`.
    /// The error string is the message returned to the caller.
    pub fn into_settings(self, run_id: &str) -> Result<RunSettings, String> {
        let experiment_design = self
            .experiment_design
            .ok_or_else(|| "Missing required field: experimentDesign".to_string())?;
        let iteration = self
            .iteration
            .ok_or_else(|| "Missing required field: iteration".to_string())?;
        let iterations = parse_iteration(&iteration)?;

        let model_choice = self
            .model_choice
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Please select a model".to_string())?;
        let model_choice: ModelChoice = model_choice.parse().map_err(|e| format!("{e}"))?;

        Ok(RunSettings {
            run_id: run_id.to_string(),
            experiment_design,
            iterations,
            model_choice,
            generator_schema: decode_field::<FieldSchema>("agent1Properties", self.agent1_properties)?
                .unwrap_or_default(),
            validator_schema: decode_field::<FieldSchema>("agent2Properties", self.agent2_properties)?
                .unwrap_or_default(),
            scorer_schema: decode_field::<FieldSchema>("agent3Properties", self.agent3_properties)?
                .unwrap_or_default(),
            previous_stimuli: decode_field::<Vec<Stimulus>>("previousStimuli", self.previous_stimuli)?
                .unwrap_or_default(),
            backend: BackendSettings {
                api_key: self.api_key,
                api_url: self.api_url,
                model_name: self.model_name,
            },
            params: decode_field::<CompletionParams>("params", self.params)?,
            ablation: decode_field::<Ablation>("ablation", self.ablation)?.unwrap_or_default(),
        })
    }
}

/// A positive integer, given as a JSON number or a numeric string.
fn parse_iteration(value: &Value) -> Result<usize, String> {
    let n = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| "Iteration must be a valid number".to_string())?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| "Iteration must be a valid number".to_string())?,
        _ => return Err("Iteration must be a valid number".into()),
    };
    if n <= 0 {
        return Err("Iteration must be a positive integer".into());
    }
    Ok(n as usize)
}

/// Decode an optional field that may be inline JSON or a JSON string.
/// Null and blank strings count as absent.
fn decode_field<T: DeserializeOwned>(name: &str, value: Option<Value>) -> Result<Option<T>, String> {
    let value = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => serde_json::from_str::<Value>(&s)
            .map_err(|e| format!("Invalid {name}: {e}"))?,
        Some(v) => v,
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| format!("Invalid {name}: {e}"))
}

/// Response for a started run.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateStartedResponse {
    pub status: String,
    pub message: String,
    pub run_id: String,
    pub total_iterations: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
    pub timestamp: i64,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request(body: Value) -> GenerateRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_string_encoded_fields() {
        let req = request(json!({
            "experimentDesign": "Pairs of words",
            "iteration": "3",
            "modelChoice": "GPT-4o",
            "agent1Properties": "{\"word\": \"a noun\"}",
            "previousStimuli": "[{\"word\": \"cat\"}]",
            "ablation": {"use_agent_3": false}
        }));
        let s = req.into_settings("run-1").unwrap();
        assert_eq!(s.iterations, 3);
        assert_eq!(s.model_choice, ModelChoice::Gpt4o);
        assert_eq!(s.generator_schema.field_names().collect::<Vec<_>>(), vec!["word"]);
        assert_eq!(s.previous_stimuli.len(), 1);
        assert!(s.ablation.use_validator);
        assert!(!s.ablation.use_scorer);
    }

    #[test]
    fn test_inline_fields() {
        let req = request(json!({
            "experimentDesign": "d",
            "iteration": 2,
            "modelChoice": "ollama",
            "agent2Properties": {"ok": "is it ok"},
            "params": {"temperature": 0.2},
            "modelName": "llama3.3"
        }));
        let s = req.into_settings("r").unwrap();
        assert_eq!(s.model_choice, ModelChoice::Ollama);
        assert_eq!(s.params.unwrap().temperature, Some(0.2));
        assert_eq!(s.backend.model_name.as_deref(), Some("llama3.3"));
        assert!(s.previous_stimuli.is_empty());
    }

    #[test]
    fn test_validation_messages() {
        let missing = request(json!({"iteration": 1, "modelChoice": "GPT-4o"}));
        assert_eq!(
            missing.into_settings("r").unwrap_err(),
            "Missing required field: experimentDesign"
        );

        let zero = request(json!({"experimentDesign": "d", "iteration": 0, "modelChoice": "GPT-4o"}));
        assert_eq!(zero.into_settings("r").unwrap_err(), "Iteration must be a positive integer");

        let nan = request(json!({"experimentDesign": "d", "iteration": "lots", "modelChoice": "GPT-4o"}));
        assert_eq!(nan.into_settings("r").unwrap_err(), "Iteration must be a valid number");

        let no_model = request(json!({"experimentDesign": "d", "iteration": 1, "modelChoice": ""}));
        assert_eq!(no_model.into_settings("r").unwrap_err(), "Please select a model");

        let unknown = request(json!({"experimentDesign": "d", "iteration": 1, "modelChoice": "gpt-2"}));
        assert_eq!(
            unknown.into_settings("r").unwrap_err(),
            "Unsupported model choice: gpt-2"
        );
    }

    #[test]
    fn test_malformed_property_string() {
        let req = request(json!({
            "experimentDesign": "d",
            "iteration": 1,
            "modelChoice": "GPT-4o",
            "agent3Properties": "{not json"
        }));
        assert!(req.into_settings("r").unwrap_err().starts_with("Invalid agent3Properties"));
    }
}
