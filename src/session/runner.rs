// src/session/runner.rs — Starting a run on its own worker task

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use super::{RunSession, SessionRegistry};
use crate::client::{create_model_client, ModelClient};
use crate::infra::errors::StimgenError;
use crate::pipeline::{
    LogChannel, ProgressSnapshot, RunController, RunOutcome, RunSettings,
};

/// Receives a run's narration and progress as the worker produces them.
pub trait RunObserver: Send + Sync {
    fn on_log(&self, run_id: &str, channel: LogChannel, text: &str);
    fn on_progress(&self, run_id: &str, progress: ProgressSnapshot);
}

/// Observer that discards everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn on_log(&self, _run_id: &str, _channel: LogChannel, _text: &str) {}
    fn on_progress(&self, _run_id: &str, _progress: ProgressSnapshot) {}
}

impl SessionRegistry {
    /// Validate `settings`, reset the run, and start its worker with a
    /// backend built from the settings' model choice.
    pub async fn start_run(
        self: &Arc<Self>,
        settings: RunSettings,
        observer: Arc<dyn RunObserver>,
    ) -> Result<Arc<RunSession>, StimgenError> {
        settings.validate()?;
        let client = create_model_client(
            settings.model_choice,
            &settings.backend,
            &self.client_config,
        )?;
        self.start_run_with_client(settings, client, observer).await
    }

    /// Like [`start_run`](Self::start_run) with an explicit client.
    pub async fn start_run_with_client(
        self: &Arc<Self>,
        settings: RunSettings,
        client: Arc<dyn ModelClient>,
        observer: Arc<dyn RunObserver>,
    ) -> Result<Arc<RunSession>, StimgenError> {
        settings.validate()?;
        let run_id = settings.run_id.clone();
        let session = self.get_or_create(&run_id);
        let _guard = session.start_guard.lock().await;
        self.reset_locked(&session).await;
        session.progress().reset(settings.iterations);
        self.persist(&session);

        let expected = settings.iterations;
        let epoch = session.epoch();

        let progress_observer = observer.clone();
        let progress_registry = Arc::downgrade(self);
        let progress_session = session.clone();
        let log_observer = observer.clone();
        let log_run_id = run_id.clone();

        let mut controller = RunController::new(
            settings,
            client,
            session.cancel_flag().clone(),
            session.progress().clone(),
        )?
        .with_generation_config(&self.generation)
        .with_progress_callback(move || {
            let snapshot = progress_session.progress().snapshot();
            progress_session.touch();
            progress_observer.on_progress(progress_session.run_id(), snapshot);
            if let Some(registry) = progress_registry.upgrade() {
                registry.persist(&progress_session);
            }
        })
        .with_log_callback(move |channel, text| {
            log_observer.on_log(&log_run_id, channel, text);
        });

        let registry = Arc::downgrade(self);
        let worker_session = session.clone();
        let handle = tokio::spawn(async move {
            let run_id = worker_session.run_id().to_string();
            observer.on_log(&run_id, LogChannel::All, "Starting generation process...");

            let result = match AssertUnwindSafe(controller.run()).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(StimgenError::Other(anyhow::anyhow!(
                    "Worker panicked: {}",
                    panic_message(payload.as_ref())
                ))),
            };
            let Some(registry) = registry.upgrade() else {
                return;
            };

            match result {
                Ok(RunOutcome::Artifact(artifact)) => {
                    if worker_session.cancel_flag().is_set() {
                        // A stopped run reports `stopped`; its partial table is not served.
                        tracing::info!(
                            run_id = %run_id,
                            records = artifact.records.len(),
                            "Run stopped; partial results discarded"
                        );
                        return;
                    }
                    if artifact.records.len() != expected {
                        let warning = format!(
                            "Warning: Expected {} stimuli but got {}",
                            expected,
                            artifact.records.len()
                        );
                        tracing::warn!(run_id = %run_id, "{}", warning);
                        observer.on_log(&run_id, LogChannel::All, &warning);
                    }
                    observer.on_log(
                        &run_id,
                        LogChannel::All,
                        &format!(
                            "Generation completed. Generated {} stimuli.",
                            artifact.records.len()
                        ),
                    );
                    registry.store_outcome(&worker_session, epoch, Some(artifact), None);
                }
                Ok(RunOutcome::Stopped) => {
                    tracing::info!(run_id = %run_id, "Run stopped before producing results");
                }
                Err(e) => {
                    let message = e.to_string();
                    observer.on_log(&run_id, LogChannel::Error, &message);
                    registry.store_outcome(&worker_session, epoch, None, Some(message));
                }
            }
        });

        session.install_worker(handle);
        tracing::info!(run_id = %run_id, iterations = expected, "Run started");
        Ok(session.clone())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
