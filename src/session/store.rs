// src/session/store.rs — Durable run-state files
//
// One JSON document per run id under the sessions directory. Writes are
// atomic (temp file + rename) so a reader never sees a half-written file.

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::errors::StimgenError;
use crate::pipeline::{Artifact, ProgressSnapshot};

/// The persisted subset of a run's state. Worker handles never persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub run_id: String,
    #[serde(default)]
    pub artifact: Option<Artifact>,
    #[serde(default)]
    pub artifact_name: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: ProgressSnapshot,
    #[serde(default)]
    pub cancelled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Run ids become file names, so only a conservative alphabet is accepted.
pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, StimgenError> {
        if !is_valid_run_id(run_id) {
            return Err(StimgenError::Session {
                run_id: run_id.to_string(),
                message: "run id contains unsupported characters".into(),
            });
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.path_for(run_id).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn save(&self, session: &PersistedSession) -> Result<(), StimgenError> {
        let dst = self.path_for(&session.run_id)?;
        std::fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_string_pretty(session)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", session.run_id));

        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.flush()?;
        f.sync_all()?;
        std::fs::rename(&tmp, &dst)?;
        Ok(())
    }

    /// `Ok(None)` when no file exists for the run.
    pub fn load(&self, run_id: &str) -> Result<Option<PersistedSession>, StimgenError> {
        let path = self.path_for(run_id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn remove(&self, run_id: &str) -> Result<bool, StimgenError> {
        let path = self.path_for(run_id)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Run ids whose file was last modified more than `max_age` ago.
    pub fn stale_ids(&self, max_age: Duration) -> Vec<String> {
        let now = SystemTime::now();
        self.entries()
            .into_iter()
            .filter(|(_, modified)| {
                now.duration_since(*modified)
                    .map(|age| age > max_age)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn entries(&self) -> Vec<(String, SystemTime)> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                let id = path.file_stem()?.to_str()?.to_string();
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((id, modified))
            })
            .collect()
    }
}
