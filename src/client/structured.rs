// src/client/structured.rs — Decode model text into a schema-checked JSON object

use super::{ClientError, FieldSchema, JsonObject};

/// Parse `content` as a JSON object carrying every field `schema` requires.
///
/// Accepts bare JSON and JSON wrapped in a markdown code fence, which some
/// OpenAI-compatible endpoints emit even when asked for `json_object`.
pub fn parse_structured(content: &str, schema: &FieldSchema) -> Result<JsonObject, ClientError> {
    let body = strip_code_fence(content.trim());

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ClientError::Parse {
            message: format!("invalid JSON: {e}"),
        })?;

    let serde_json::Value::Object(object) = value else {
        return Err(ClientError::Parse {
            message: "response is not a JSON object".into(),
        });
    };

    let missing: Vec<&str> = schema
        .field_names()
        .filter(|name| !object.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(ClientError::Parse {
            message: format!("missing required fields: {}", missing.join(", ")),
        });
    }

    Ok(object)
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop an optional language tag on the opening line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
