// src/pipeline/controller.rs — Run controller: the generate → validate → score loop

use std::fmt;
use std::sync::Arc;

use super::agents::{Agents, Stage};
use super::cancel::{CancelFlag, Progress};
use super::comparator::find_repetition;
use super::types::*;
use crate::client::ModelClient;
use crate::infra::config::GenerationConfig;
use crate::infra::errors::StimgenError;

/// Named points where the worker honours a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    BeforeStart,
    BeforeIteration,
    BeforeGenerate,
    AfterGenerate,
    AfterRepetitionCheck,
    AfterValidate,
    BeforeScore,
    AfterScore,
    Materialize,
    Final,
}

impl Checkpoint {
    pub fn message(&self) -> &'static str {
        match self {
            Checkpoint::BeforeStart => "Generation stopped before starting.",
            Checkpoint::BeforeIteration | Checkpoint::BeforeGenerate => {
                "Generation stopped by user."
            }
            Checkpoint::AfterGenerate => "Generation stopped after 'Generator'.",
            Checkpoint::AfterRepetitionCheck => "Generation stopped after repetition check.",
            Checkpoint::AfterValidate => "Generation stopped after 'Validator'.",
            Checkpoint::BeforeScore => "Generation stopped before Scorer.",
            Checkpoint::AfterScore => "Generation stopped after 'Scorer'.",
            Checkpoint::Materialize => "Generation stopped after saving intermediate results.",
            Checkpoint::Final => "Generation stopped at final step.",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Worker-owned accumulators for one run.
#[derive(Debug, Default)]
struct LoopState {
    records: Vec<RunRecord>,
    previous: Vec<Stimulus>,
    repetition_count: u32,
    validation_fails: u32,
    last_artifact: Option<Artifact>,
}

enum Flow {
    Finished(Artifact),
    Cancelled,
}

type ProgressCallback = Box<dyn Fn() + Send + Sync>;
type LogCallback = Box<dyn Fn(LogChannel, &str) + Send + Sync>;
type ArtifactCallback = Box<dyn Fn(&Artifact) + Send + Sync>;

/// Drives one run to completion, cancellation, or failure.
pub struct RunController {
    settings: RunSettings,
    agents: Agents,
    cancel: CancelFlag,
    progress: Progress,
    materialize_every: usize,
    max_regenerations: Option<u32>,
    phase: RunPhase,
    on_progress_changed: Option<ProgressCallback>,
    on_log: Option<LogCallback>,
    on_materialized: Option<ArtifactCallback>,
}

impl RunController {
    pub fn new(
        settings: RunSettings,
        client: Arc<dyn ModelClient>,
        cancel: CancelFlag,
        progress: Progress,
    ) -> Result<Self, StimgenError> {
        settings.validate()?;
        let defaults = GenerationConfig::default();
        Ok(Self {
            agents: Agents::new(client, cancel.clone())?,
            settings,
            cancel,
            progress,
            materialize_every: defaults.materialize_every,
            max_regenerations: defaults.max_regenerations,
            phase: RunPhase::Idle,
            on_progress_changed: None,
            on_log: None,
            on_materialized: None,
        })
    }

    pub fn with_generation_config(mut self, config: &GenerationConfig) -> Self {
        self.materialize_every = config.materialize_every.max(1);
        self.max_regenerations = config.max_regenerations;
        self
    }

    /// Called whenever the progress counters change. Reads them itself.
    pub fn with_progress_callback(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_progress_changed = Some(Box::new(cb));
        self
    }

    pub fn with_log_callback(
        mut self,
        cb: impl Fn(LogChannel, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_log = Some(Box::new(cb));
        self
    }

    /// Called with every intermediate and final artifact.
    pub fn with_materialized_callback(
        mut self,
        cb: impl Fn(&Artifact) + Send + Sync + 'static,
    ) -> Self {
        self.on_materialized = Some(Box::new(cb));
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn log(&self, channel: LogChannel, text: &str) {
        tracing::debug!(run_id = %self.settings.run_id, channel = %channel, "{}", text);
        if let Some(ref cb) = self.on_log {
            cb(channel, text);
        }
    }

    fn progress_changed(&self) {
        if let Some(ref cb) = self.on_progress_changed {
            cb();
        }
    }

    /// True (and narrated) when a stop was requested.
    fn stopped(&self, at: Checkpoint) -> bool {
        if !self.cancel.is_set() {
            return false;
        }
        tracing::info!(run_id = %self.settings.run_id, checkpoint = %at, "Run cancelled");
        self.log(LogChannel::All, at.message());
        true
    }

    fn materialize(&self, records: &[RunRecord]) -> Artifact {
        Artifact::new(
            &self.settings.run_id,
            records.to_vec(),
            self.settings.iterations,
        )
    }

    /// Execute the run.
    ///
    /// Returns `RunOutcome::Stopped` when cancelled before any record was
    /// accepted, otherwise an artifact whose status tells complete, cancelled
    /// and soft-failed runs apart. `Err` only when something broke before the
    /// first record.
    pub async fn run(&mut self) -> Result<RunOutcome, StimgenError> {
        self.phase = RunPhase::Running;
        self.progress.reset(self.settings.iterations);
        self.progress_changed();

        tracing::info!(
            run_id = %self.settings.run_id,
            iterations = self.settings.iterations,
            client = self.agents.client_id(),
            "Starting generation run"
        );

        if self.stopped(Checkpoint::BeforeStart) {
            self.phase = RunPhase::Stopped;
            return Ok(RunOutcome::Stopped);
        }

        self.log_setup();

        let mut state = LoopState {
            previous: self.settings.previous_stimuli.clone(),
            ..Default::default()
        };

        match self.drive(&mut state).await {
            Ok(Flow::Finished(artifact)) => {
                self.phase = RunPhase::Completed;
                tracing::info!(
                    run_id = %self.settings.run_id,
                    records = artifact.records.len(),
                    "Generation run completed"
                );
                Ok(RunOutcome::Artifact(artifact))
            }
            Ok(Flow::Cancelled) => {
                self.phase = RunPhase::Stopped;
                if state.records.is_empty() {
                    Ok(RunOutcome::Stopped)
                } else {
                    let artifact = self
                        .materialize(&state.records)
                        .with_status(ArtifactStatus::Cancelled);
                    Ok(RunOutcome::Artifact(artifact))
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.log(LogChannel::All, &format!("Error during generation: {}", message));
                if state.records.is_empty() {
                    tracing::error!(run_id = %self.settings.run_id, "Generation run failed: {}", e);
                    self.phase = RunPhase::Failed;
                    return Err(e);
                }
                tracing::warn!(
                    run_id = %self.settings.run_id,
                    records = state.records.len(),
                    "Generation run failed; returning partial results: {}",
                    e
                );
                self.phase = RunPhase::Completed;
                let artifact = self
                    .materialize(&state.records)
                    .with_status(ArtifactStatus::Error { message });
                Ok(RunOutcome::Artifact(artifact))
            }
        }
    }

    fn log_setup(&self) {
        let s = &self.settings;
        let schemas = [
            ("Generator", &s.generator_schema),
            ("Validator", &s.validator_schema),
            ("Scorer", &s.scorer_schema),
        ];
        for (stage, schema) in schemas {
            let text = serde_json::to_string(schema).unwrap_or_default();
            self.log(LogChannel::Setup, &format!("{} properties: {}", stage, text));
        }
        self.log(
            LogChannel::Setup,
            &format!("Using model: {}", s.model_choice),
        );
        if !s.ablation.use_validator {
            self.log(LogChannel::Setup, "Ablation: repetition and validation checks are advisory");
        }
        if !s.ablation.use_scorer {
            self.log(LogChannel::Setup, "Ablation: scoring disabled");
        }
    }

    async fn drive(&self, state: &mut LoopState) -> Result<Flow, StimgenError> {
        let total = self.settings.iterations;

        for index in 0..total {
            if self.stopped(Checkpoint::BeforeIteration) {
                return Ok(Flow::Cancelled);
            }
            self.log(LogChannel::All, &format!("=== No. {} Round ===", index + 1));

            let Some((candidate, verdict)) = self.accept_candidate(index, state).await? else {
                return Ok(Flow::Cancelled);
            };

            if self.stopped(Checkpoint::BeforeScore) {
                return Ok(Flow::Cancelled);
            }

            let scores = if self.settings.ablation.use_scorer {
                match self
                    .agents
                    .score(
                        &self.settings.experiment_design,
                        &candidate,
                        &self.settings.scorer_schema,
                    )
                    .await?
                {
                    Stage::Ready(scores) => {
                        self.log(
                            LogChannel::Scorer,
                            &format!("Scorer's Output: {}", pretty(&scores.0)),
                        );
                        Some(scores)
                    }
                    Stage::Failed(reason) => {
                        self.log(
                            LogChannel::Scorer,
                            &format!("Scoring failed ({}); recording zero scores", reason),
                        );
                        Some(ScoreResult::zeroed(&self.settings.scorer_schema))
                    }
                    Stage::Cancelled => {
                        self.stopped(Checkpoint::AfterScore);
                        return Ok(Flow::Cancelled);
                    }
                }
            } else {
                self.log(LogChannel::Scorer, "Ablation: Skipping Scorer");
                None
            };

            if self.stopped(Checkpoint::AfterScore) {
                return Ok(Flow::Cancelled);
            }

            state.records.push(RunRecord {
                stimulus_id: index + 1,
                stimulus: candidate.clone(),
                repetition_count: state.repetition_count,
                validation_fails: state.validation_fails,
                validation: verdict,
                scores,
            });
            state.previous.push(candidate);

            if self.progress.advance_to(index + 1) {
                self.progress_changed();
            }

            let completed = index + 1;
            if completed % self.materialize_every == 0 || completed == total {
                let artifact = self.materialize(&state.records);
                tracing::debug!(
                    run_id = %self.settings.run_id,
                    records = artifact.records.len(),
                    name = %artifact.name,
                    "Materialized results"
                );
                if let Some(ref cb) = self.on_materialized {
                    cb(&artifact);
                }
                state.last_artifact = Some(artifact);
                if self.stopped(Checkpoint::Materialize) {
                    return Ok(Flow::Cancelled);
                }
            }
        }

        if self.stopped(Checkpoint::Final) {
            return Ok(Flow::Cancelled);
        }
        let artifact = match state.last_artifact.take() {
            Some(a) => a,
            None => self.materialize(&state.records),
        };
        Ok(Flow::Finished(artifact))
    }

    /// Steps 1–3 of an iteration: regenerate until a candidate is novel and
    /// passes validation. `None` means the run was cancelled.
    async fn accept_candidate(
        &self,
        index: usize,
        state: &mut LoopState,
    ) -> Result<Option<(Stimulus, ValidationResult)>, StimgenError> {
        let s = &self.settings;
        let mut discarded: u32 = 0;

        loop {
            if self.stopped(Checkpoint::BeforeGenerate) {
                return Ok(None);
            }

            let candidate = match self
                .agents
                .generate(
                    &s.experiment_design,
                    &state.previous,
                    &s.generator_schema,
                    s.params.as_ref(),
                )
                .await?
            {
                Stage::Ready(candidate) => candidate,
                Stage::Failed(reason) => {
                    self.log(
                        LogChannel::Generator,
                        &format!("Generation failed ({}), regenerating...", reason),
                    );
                    self.note_discard(index, &mut discarded)?;
                    continue;
                }
                Stage::Cancelled => {
                    self.stopped(Checkpoint::AfterGenerate);
                    return Ok(None);
                }
            };

            self.log(
                LogChannel::Generator,
                &format!("Generator's Output: {}", candidate.to_pretty_json()),
            );
            if self.stopped(Checkpoint::AfterGenerate) {
                return Ok(None);
            }

            if let Some((_, dimension)) = find_repetition(&candidate, &state.previous) {
                state.repetition_count += 1;
                tracing::debug!(run_id = %s.run_id, iteration = index + 1, dimension, "Repeated stimulus");
                if s.ablation.use_validator {
                    self.log(
                        LogChannel::Generator,
                        "Detected repeated stimulus, regenerating...",
                    );
                    self.note_discard(index, &mut discarded)?;
                    continue;
                }
                self.log(
                    LogChannel::Generator,
                    "Ablation: Skipping repetition check",
                );
            }

            if self.stopped(Checkpoint::AfterRepetitionCheck) {
                return Ok(None);
            }

            let verdict = match self
                .agents
                .validate(&s.experiment_design, &candidate, &s.validator_schema)
                .await?
            {
                Stage::Ready(verdict) => verdict,
                Stage::Failed(reason) => {
                    self.log(
                        LogChannel::Validator,
                        &format!("Validation error: {}", reason),
                    );
                    self.note_discard(index, &mut discarded)?;
                    continue;
                }
                Stage::Cancelled => {
                    self.stopped(Checkpoint::AfterValidate);
                    return Ok(None);
                }
            };

            self.log(
                LogChannel::Validator,
                &format!("Validator's Output: {}", pretty(&verdict.0)),
            );
            if self.stopped(Checkpoint::AfterValidate) {
                return Ok(None);
            }

            if verdict.passed() {
                self.log(
                    LogChannel::Validator,
                    "All validations passed, proceeding to next step...",
                );
                return Ok(Some((candidate, verdict)));
            }
            let failed = verdict.failed_fields();

            state.validation_fails += 1;
            if s.ablation.use_validator {
                self.log(
                    LogChannel::Validator,
                    &format!("Failed validation for fields: {:?}, regenerating...", failed),
                );
                self.note_discard(index, &mut discarded)?;
                continue;
            }
            self.log(
                LogChannel::Validator,
                &format!(
                    "Failed validation for fields: {:?}; Ablation: accepting anyway",
                    failed
                ),
            );
            return Ok(Some((candidate, verdict)));
        }
    }

    /// Count one discarded candidate against the optional regeneration cap.
    fn note_discard(&self, index: usize, discarded: &mut u32) -> Result<(), StimgenError> {
        *discarded += 1;
        match self.max_regenerations {
            Some(max) if *discarded > max => Err(StimgenError::RegenerationLimit {
                iteration: index + 1,
                attempts: max,
            }),
            _ => Ok(()),
        }
    }
}

fn pretty(fields: &crate::client::JsonObject) -> String {
    serde_json::to_string_pretty(fields).unwrap_or_default()
}
