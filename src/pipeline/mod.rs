// src/pipeline/mod.rs — Stimulus generation pipeline

pub mod agents;
pub mod cancel;
pub mod comparator;
pub mod controller;
pub mod export;
pub mod prompts;
pub mod types;

pub use cancel::{CancelFlag, Progress, ProgressSnapshot};
pub use comparator::is_repeated;
pub use controller::{Checkpoint, RunController};
pub use types::{
    Ablation, Artifact, ArtifactStatus, LogChannel, RunOutcome, RunPhase, RunRecord, RunSettings,
    ScoreResult, Stimulus, ValidationResult,
};
