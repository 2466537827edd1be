// src/cli/run.rs — One pipeline run in the foreground

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client::{create_model_client, ModelChoice, ModelClient};
use crate::infra::config::{Config, GenerationConfig};
use crate::infra::paths;
use crate::pipeline::export::{status_label, to_csv, write_csv};
use crate::pipeline::{
    Artifact, CancelFlag, Progress, RunController, RunOutcome, RunSettings,
};
use crate::session::RunObserver;

use super::progress::TerminalObserver;

/// Read a settings file. `run_id` and `model_choice` may be omitted; the
/// former is generated, the latter taken from `default_model`.
pub fn load_settings(
    path: &Path,
    default_model: &str,
    model_override: Option<&str>,
) -> anyhow::Result<RunSettings> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read settings file {}: {e}", path.display()))?;
    let mut value: serde_json::Value = serde_json::from_str(&content)?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("Settings file must contain a JSON object"))?;

    if !obj.contains_key("run_id") {
        let id = uuid::Uuid::new_v4().simple().to_string();
        obj.insert("run_id".into(), id[..12].into());
    }
    let model = match model_override {
        Some(model) => Some(model),
        None if !obj.contains_key("model_choice") => Some(default_model),
        None => None,
    };
    if let Some(model) = model {
        let choice: ModelChoice = model.parse()?;
        obj.insert("model_choice".into(), choice.as_str().into());
    }

    let settings: RunSettings = serde_json::from_value(value)?;
    settings.validate()?;
    Ok(settings)
}

fn is_csv_path(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

/// Write to an explicit `.csv` path, into a directory, or into the
/// default outputs directory.
fn write_artifact(artifact: &Artifact, output: Option<&Path>) -> anyhow::Result<PathBuf> {
    match output {
        Some(file) if is_csv_path(file) => {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(file, to_csv(artifact))?;
            Ok(file.to_path_buf())
        }
        Some(dir) => Ok(write_csv(artifact, dir)?),
        None => Ok(write_csv(artifact, &paths::outputs_dir())?),
    }
}

/// Run the pipeline to an outcome and write whatever artifact it produced.
/// Returns the written path, or `None` when the run stopped empty-handed.
pub async fn execute(
    settings: RunSettings,
    client: Arc<dyn ModelClient>,
    generation: &GenerationConfig,
    observer: Arc<dyn RunObserver>,
    cancel: CancelFlag,
    output: Option<&Path>,
) -> anyhow::Result<Option<PathBuf>> {
    let run_id = settings.run_id.clone();
    let progress = Progress::new();
    progress.reset(settings.iterations);

    let progress_observer = observer.clone();
    let progress_run_id = run_id.clone();
    let progress_view = progress.clone();
    let log_observer = observer.clone();
    let log_run_id = run_id.clone();

    let mut controller = RunController::new(settings, client, cancel, progress)?
        .with_generation_config(generation)
        .with_progress_callback(move || {
            progress_observer.on_progress(&progress_run_id, progress_view.snapshot());
        })
        .with_log_callback(move |channel, text| log_observer.on_log(&log_run_id, channel, text));

    match controller.run().await? {
        RunOutcome::Stopped => {
            tracing::info!(run_id = %run_id, "Stopped before any stimulus was accepted");
            Ok(None)
        }
        RunOutcome::Artifact(artifact) => {
            let path = write_artifact(&artifact, output)?;
            if let Some(message) = artifact.error_message() {
                tracing::warn!(run_id = %run_id, "Run failed after partial results: {}", message);
            }
            tracing::info!(
                run_id = %run_id,
                status = status_label(&artifact),
                rows = artifact.records.len(),
                path = %path.display(),
                "Results written"
            );
            Ok(Some(path))
        }
    }
}

/// `stimgen run`: build the backend, wire Ctrl-C to cancellation, run.
pub async fn run_foreground(
    config: &Config,
    settings_path: &Path,
    output: Option<&Path>,
    model_override: Option<&str>,
    quiet: bool,
) -> anyhow::Result<()> {
    let settings = load_settings(
        settings_path,
        &config.generation.default_model,
        model_override,
    )?;
    let client = create_model_client(settings.model_choice, &settings.backend, &config.client)?;
    let observer: Arc<dyn RunObserver> = Arc::new(TerminalObserver::stderr(quiet));

    let cancel = CancelFlag::new();
    let signal_cancel = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[stop] Stopping... Please wait.");
            signal_cancel.set();
        }
    });

    let result = execute(
        settings,
        client,
        &config.generation,
        observer,
        cancel,
        output,
    )
    .await;
    ctrl_c.abort();

    match result? {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("[stop] No stimuli were accepted; nothing written."),
    }
    Ok(())
}
