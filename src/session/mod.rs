// src/session/mod.rs — Run-state registry
//
// One `RunSession` per run id. The worker writes progress, artifacts and
// errors; request handlers read them or flip the cancellation flag. Nothing
// here blocks on a worker except reset and expiry, which stop it first.

pub mod runner;
pub mod store;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::infra::config::{ClientConfig, Config, GenerationConfig};
use crate::pipeline::{Artifact, ArtifactStatus, CancelFlag, Progress, ProgressSnapshot};
use store::{PersistedSession, SessionStore};

pub use runner::{NoopObserver, RunObserver};

/// What a status poll reports for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Stopped,
    Error {
        error_message: String,
        /// Partial results that survived a soft failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    Completed {
        file: String,
    },
    Running {
        progress: u8,
    },
}

/// Mutable fields of a run besides the flag and counters.
#[derive(Debug, Default)]
struct SessionState {
    artifact: Option<Artifact>,
    artifact_name: Option<String>,
    error: Option<String>,
    worker: Option<JoinHandle<()>>,
    /// Bumped on every reset so a late worker cannot overwrite a newer run.
    epoch: u64,
    touched_at: Option<DateTime<Utc>>,
}

/// Comparable view of a session, for status reporting and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub progress: ProgressSnapshot,
    pub cancelled: bool,
    pub artifact_name: Option<String>,
    pub record_count: usize,
    pub error: Option<String>,
    pub worker_running: bool,
}

pub struct RunSession {
    run_id: String,
    cancel: CancelFlag,
    progress: Progress,
    state: Mutex<SessionState>,
    /// Held across reset, spawn and handle install so starts on one run id
    /// never overlap.
    start_guard: tokio::sync::Mutex<()>,
}

impl RunSession {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            cancel: CancelFlag::new(),
            progress: Progress::new(),
            state: Mutex::new(SessionState {
                touched_at: Some(Utc::now()),
                ..Default::default()
            }),
            start_guard: tokio::sync::Mutex::new(()),
        }
    }

    fn restore(persisted: PersistedSession) -> Self {
        let session = Self::new(&persisted.run_id);
        session.progress.restore(persisted.progress);
        if persisted.cancelled {
            session.cancel.set();
        }
        {
            let mut state = session.lock();
            state.artifact = persisted.artifact;
            state.artifact_name = persisted.artifact_name;
            state.error = persisted.error;
            state.touched_at = Some(persisted.updated_at);
        }
        session
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            progress: self.progress.snapshot(),
            cancelled: self.cancel.is_set(),
            artifact_name: state.artifact_name.clone(),
            record_count: state.artifact.as_ref().map(|a| a.records.len()).unwrap_or(0),
            error: state.error.clone(),
            worker_running: state.worker.as_ref().is_some_and(|h| !h.is_finished()),
        }
    }

    pub fn artifact(&self) -> Option<Artifact> {
        self.lock().artifact.clone()
    }

    fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    fn to_persisted(&self) -> PersistedSession {
        let state = self.lock();
        PersistedSession {
            run_id: self.run_id.clone(),
            artifact: state.artifact.clone(),
            artifact_name: state.artifact_name.clone(),
            error: state.error.clone(),
            progress: self.progress.snapshot(),
            cancelled: self.cancel.is_set(),
            updated_at: Utc::now(),
        }
    }

    fn last_touched(&self) -> Option<DateTime<Utc>> {
        self.lock().touched_at
    }

    pub(crate) fn touch(&self) {
        self.lock().touched_at = Some(Utc::now());
    }

    /// Install a new worker handle, aborting whatever it replaces.
    fn install_worker(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.lock().worker.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the worker (if any) and wait for it to unwind.
    async fn stop_worker(&self) {
        self.cancel.set();
        let handle = self.lock().worker.take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(run_id = %self.run_id, "Worker ended abnormally: {}", e);
                }
            }
        }
    }
}

/// Why a download request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    NoData,
    NameMismatch,
    WrongRun,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<RunSession>>>,
    store: Option<SessionStore>,
    pub(crate) client_config: ClientConfig,
    pub(crate) generation: GenerationConfig,
}

impl SessionRegistry {
    /// Registry configured from the `[sessions]`, `[client]` and `[generation]` sections.
    pub fn new(config: &Config) -> Self {
        let store = config
            .sessions
            .persist
            .then(|| SessionStore::new(config.sessions.resolved_dir()));
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            client_config: config.client.clone(),
            generation: config.generation.clone(),
        }
    }

    /// Registry without durable storage.
    pub fn in_memory() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store: None,
            client_config: ClientConfig::default(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<RunSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Resident session only; never touches durable storage.
    pub fn get(&self, run_id: &str) -> Option<Arc<RunSession>> {
        self.map().get(run_id).cloned()
    }

    /// Resident session, else the durable copy, else a fresh one.
    pub fn get_or_create(&self, run_id: &str) -> Arc<RunSession> {
        let mut map = self.map();
        if let Some(session) = map.get(run_id) {
            return session.clone();
        }

        let loaded = self.store.as_ref().and_then(|store| match store.load(run_id) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(run_id, "Failed to load session state: {}", e);
                None
            }
        });
        let fresh = loaded.is_none();
        let session = Arc::new(match loaded {
            Some(persisted) => {
                tracing::debug!(run_id, "Restored session from disk");
                RunSession::restore(persisted)
            }
            None => RunSession::new(run_id),
        });
        map.insert(run_id.to_string(), session.clone());
        drop(map);

        if fresh {
            self.persist(&session);
        }
        session
    }

    /// Write the session's durable copy. Failures are logged, not raised.
    pub fn persist(&self, session: &RunSession) {
        let Some(ref store) = self.store else { return };
        if let Err(e) = store.save(&session.to_persisted()) {
            tracing::debug!(run_id = %session.run_id, "Failed to persist session: {}", e);
        }
    }

    /// Stop any in-flight worker and return the session to its zeroed state.
    /// Idempotent.
    pub async fn reset_for_new_run(&self, run_id: &str) -> Arc<RunSession> {
        let session = self.get_or_create(run_id);
        let _guard = session.start_guard.lock().await;
        self.reset_locked(&session).await;
        session.clone()
    }

    /// Reset with the session's start guard already held.
    async fn reset_locked(&self, session: &RunSession) {
        session.stop_worker().await;

        {
            let mut state = session.lock();
            state.artifact = None;
            state.artifact_name = None;
            state.error = None;
            if let Some(stray) = state.worker.take() {
                stray.abort();
            }
            state.epoch += 1;
            state.touched_at = Some(Utc::now());
        }
        session.progress.reset(0);
        session.cancel.clear();

        self.persist(session);
        tracing::debug!(run_id = %session.run_id, "Session reset for new run");
    }

    /// Ask the run's worker to stop. Safe to call repeatedly, from anywhere.
    pub fn request_cancel(&self, run_id: &str) {
        let session = self.get_or_create(run_id);
        session.cancel.set();
        {
            let mut state = session.lock();
            state.artifact_name = None;
            state.touched_at = Some(Utc::now());
        }
        self.persist(&session);
        tracing::info!(run_id, "Cancellation requested");
    }

    /// Stop and forget one run, resident and durable.
    pub async fn remove(&self, run_id: &str) -> bool {
        let session = self.map().remove(run_id);
        let resident = match session {
            Some(session) => {
                session.stop_worker().await;
                true
            }
            None => false,
        };
        let durable = match self.store {
            Some(ref store) => store.remove(run_id).unwrap_or(false),
            None => false,
        };
        resident || durable
    }

    /// Remove runs older than `max_age`, stopping their workers first.
    /// Returns how many runs were removed.
    pub async fn expire_stale(&self, max_age: Duration) -> usize {
        let mut expired: Vec<String> = Vec::new();

        match self.store {
            Some(ref store) => {
                expired.extend(store.stale_ids(max_age));
                // Resident runs whose durable copy disappeared are orphans.
                let orphans: Vec<String> = self
                    .map()
                    .keys()
                    .filter(|id| !store.exists(id))
                    .cloned()
                    .collect();
                expired.extend(orphans);
            }
            None => {
                let cutoff = chrono::Duration::from_std(max_age)
                    .map(|age| Utc::now() - age)
                    .unwrap_or_else(|_| Utc::now());
                expired.extend(
                    self.map()
                        .iter()
                        .filter(|(_, s)| s.last_touched().is_some_and(|t| t < cutoff))
                        .map(|(id, _)| id.clone()),
                );
            }
        }

        expired.sort();
        expired.dedup();
        let mut removed = 0;
        for run_id in &expired {
            if self.remove(run_id).await {
                removed += 1;
                tracing::info!(run_id = %run_id, "Expired session removed");
            }
        }
        removed
    }

    /// Current status of a run, as reported to pollers.
    pub fn status(&self, run_id: &str) -> RunStatus {
        let session = self.get_or_create(run_id);
        session.touch();
        if session.cancel.is_set() {
            return RunStatus::Stopped;
        }

        let mut state = session.lock();
        if let Some(ref message) = state.error {
            return RunStatus::Error {
                error_message: message.clone(),
                file: state.artifact_name.clone(),
            };
        }

        let progress = session.progress.snapshot();
        let worker_running = state.worker.as_ref().is_some_and(|h| !h.is_finished());

        if progress.is_complete() && !worker_running {
            match state.artifact_name.clone() {
                Some(name) if name.contains(run_id) => {
                    return RunStatus::Completed { file: name };
                }
                Some(name) => {
                    tracing::warn!(run_id, file = %name, "Artifact does not match session");
                    state.error = Some("Generated file does not match current session".into());
                    return RunStatus::Error {
                        error_message: "Generated file does not match session".into(),
                        file: None,
                    };
                }
                None if state.worker.is_some() => {
                    state.error = Some("Generation completed but no file was produced".into());
                    return RunStatus::Error {
                        error_message: "Generation completed but no file was produced. Please try again."
                            .into(),
                        file: None,
                    };
                }
                None => {}
            }
        }

        RunStatus::Running {
            progress: progress.percent(),
        }
    }

    /// The artifact to serve for `filename`, if it is the run's current one.
    pub fn artifact_for_download(
        &self,
        run_id: &str,
        filename: &str,
    ) -> Result<Artifact, DownloadError> {
        let session = self.get_or_create(run_id);
        let state = session.lock();
        let artifact = state.artifact.as_ref().ok_or(DownloadError::NoData)?;
        if state.artifact_name.as_deref() != Some(filename) {
            return Err(DownloadError::NameMismatch);
        }
        if !filename.contains(run_id) {
            return Err(DownloadError::WrongRun);
        }
        Ok(artifact.clone())
    }

    /// Drop the stored artifact, but only if it is still `filename`.
    pub fn clear_artifact_if(&self, run_id: &str, filename: &str) -> bool {
        let Some(session) = self.get(run_id) else {
            return false;
        };
        let cleared = {
            let mut state = session.lock();
            if state.artifact_name.as_deref() == Some(filename) {
                state.artifact = None;
                state.artifact_name = None;
                true
            } else {
                false
            }
        };
        if cleared {
            self.persist(&session);
            tracing::debug!(run_id, file = filename, "Cleared artifact after download");
        }
        cleared
    }

    /// Record a worker's result, unless the run was reset since it started.
    fn store_outcome(
        &self,
        session: &RunSession,
        epoch: u64,
        artifact: Option<Artifact>,
        error: Option<String>,
    ) {
        {
            let mut state = session.lock();
            if state.epoch != epoch {
                tracing::debug!(run_id = %session.run_id, "Discarding result of a superseded run");
                return;
            }
            if let Some(ref a) = artifact {
                if let ArtifactStatus::Error { ref message } = a.status {
                    state.error = Some(message.clone());
                }
            }
            state.artifact_name = artifact.as_ref().map(|a| a.name.clone());
            state.artifact = artifact;
            if error.is_some() {
                state.error = error;
            }
            state.touched_at = Some(Utc::now());
        }
        self.persist(session);
    }
}
