// src/pipeline/export.rs — CSV rendering of a result artifact

use std::path::{Path, PathBuf};

use super::types::{value_text, Artifact, ArtifactStatus, RunRecord};
use crate::infra::errors::StimgenError;

const RECORD_COLUMNS: [&str; 5] = [
    "stimulus_id",
    "stimulus_content",
    "repetition_count",
    "validation_fails",
    "validation_failure_reasons",
];

/// Render the artifact as CSV (RFC 4180 quoting, `\n` line endings).
pub fn to_csv(artifact: &Artifact) -> String {
    to_csv_with(artifact, &[])
}

/// Like [`to_csv`], with constant columns appended to every row.
pub fn to_csv_with(artifact: &Artifact, extra: &[(&str, String)]) -> String {
    let score_columns = score_columns(&artifact.records);
    let error = artifact.error_message();

    let mut header: Vec<&str> = RECORD_COLUMNS.to_vec();
    header.extend(score_columns.iter().map(String::as_str));
    header.extend(["generation_timestamp", "batch_id", "total_iterations"]);
    if error.is_some() {
        header.extend(["error_occurred", "error_message"]);
    }
    header.extend(extra.iter().map(|(name, _)| *name));

    let mut out = String::new();
    push_row(&mut out, header.iter().map(|h| h.to_string()));

    for record in &artifact.records {
        let mut row = vec![
            record.stimulus_id.to_string(),
            serde_json::to_string(&record.stimulus).unwrap_or_default(),
            record.repetition_count.to_string(),
            record.validation_fails.to_string(),
            serde_json::to_string(&record.validation).unwrap_or_default(),
        ];
        for column in &score_columns {
            row.push(
                record
                    .scores
                    .as_ref()
                    .and_then(|s| s.0.get(column))
                    .map(value_text)
                    .unwrap_or_default(),
            );
        }
        row.push(artifact.generation_timestamp.to_string());
        row.push(artifact.batch_id.clone());
        row.push(artifact.total_iterations.to_string());
        if let Some(message) = error {
            row.push("True".into());
            row.push(message.to_string());
        }
        row.extend(extra.iter().map(|(_, v)| v.clone()));
        push_row(&mut out, row.into_iter());
    }
    out
}

/// Write the artifact to `dir/<artifact name>` and return the path.
pub fn write_csv(artifact: &Artifact, dir: &Path) -> Result<PathBuf, StimgenError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(&artifact.name);
    std::fs::write(&path, to_csv(artifact))?;
    Ok(path)
}

/// Score dimensions in order of first appearance across all records.
fn score_columns(records: &[RunRecord]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for scores in records.iter().filter_map(|r| r.scores.as_ref()) {
        for key in scores.0.keys() {
            if !columns.iter().any(|c| c == key) && !RECORD_COLUMNS.contains(&key.as_str()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let line: Vec<String> = fields.map(|f| escape(&f)).collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Short, human-readable label for a run's terminal status.
pub fn status_label(artifact: &Artifact) -> &'static str {
    match artifact.status {
        ArtifactStatus::Complete => "complete",
        ArtifactStatus::Cancelled => "cancelled",
        ArtifactStatus::Error { .. } => "error",
    }
}
