// tests/session_test.rs — Integration test: run registry driving real workers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use stimgen::client::{
    BackendSettings, ClientError, CompletionParams, FieldSchema, JsonObject, ModelChoice,
    ModelClient,
};
use stimgen::pipeline::{Ablation, ProgressSnapshot, RunSettings};
use stimgen::session::store::SessionStore;
use stimgen::session::{NoopObserver, RunSession, RunStatus, SessionRegistry};

/// Answers every stage after a short delay, with a fresh word per generate call.
struct SlowClient {
    delay: Duration,
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl SlowClient {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            calls: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for SlowClient {
    fn id(&self) -> &str {
        "slow"
    }

    fn default_params(&self) -> CompletionParams {
        CompletionParams::default()
    }

    async fn generate_completion(
        &self,
        prompt: &str,
        _schema: &FieldSchema,
        _params: Option<&CompletionParams>,
    ) -> Result<JsonObject, ClientError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.fail_after.is_some_and(|limit| n > limit) {
            return Err(ClientError::Http {
                status: 403,
                body: "quota exhausted".into(),
            });
        }
        let value = if prompt.starts_with("Please help me construct") {
            json!({"word": format!("item-{n}")})
        } else if prompt.starts_with("Please verify") {
            json!({"valid": true})
        } else {
            json!({"arousal": 3})
        };
        Ok(value.as_object().cloned().unwrap())
    }
}

fn settings(run_id: &str, iterations: usize) -> RunSettings {
    RunSettings {
        run_id: run_id.into(),
        experiment_design: "Emotion words".into(),
        iterations,
        model_choice: ModelChoice::Ollama,
        generator_schema: FieldSchema::default(),
        validator_schema: FieldSchema::default(),
        scorer_schema: FieldSchema::default(),
        previous_stimuli: vec![],
        backend: BackendSettings::default(),
        params: None,
        ablation: Ablation::default(),
    }
}

async fn wait_for_worker(session: &RunSession) {
    for _ in 0..500 {
        if !session.snapshot().worker_running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("worker did not finish");
}

#[tokio::test]
async fn test_completed_run_reports_file_for_its_run() {
    let reg = Arc::new(SessionRegistry::in_memory());
    let session = reg
        .start_run_with_client(
            settings("complete-1", 3),
            Arc::new(SlowClient::new(1)),
            Arc::new(NoopObserver),
        )
        .await
        .unwrap();
    wait_for_worker(&session).await;

    let file = match reg.status("complete-1") {
        RunStatus::Completed { file } => file,
        other => panic!("unexpected status {other:?}"),
    };
    assert!(file.contains("complete-1"));
    assert_eq!(session.snapshot().record_count, 3);
    assert_eq!(reg.artifact_for_download("complete-1", &file).unwrap().records.len(), 3);
}

#[tokio::test]
async fn test_stop_mid_run_halts_calls_and_reports_stopped() {
    let reg = Arc::new(SessionRegistry::in_memory());
    let client = Arc::new(SlowClient::new(20));
    let session = reg
        .start_run_with_client(settings("stop-1", 50), client.clone(), Arc::new(NoopObserver))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    reg.request_cancel("stop-1");
    wait_for_worker(&session).await;

    let calls_at_stop = client.calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.calls(), calls_at_stop);

    assert_eq!(reg.status("stop-1"), RunStatus::Stopped);
    let snap = session.snapshot();
    assert!(snap.cancelled);
    assert!(snap.artifact_name.is_none());
    assert!(snap.progress.current < 50);
}

#[tokio::test]
async fn test_restart_replaces_running_worker() {
    let reg = Arc::new(SessionRegistry::in_memory());
    let first = Arc::new(SlowClient::new(20));
    reg.start_run_with_client(settings("again", 100), first.clone(), Arc::new(NoopObserver))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = Arc::new(SlowClient::new(1));
    let session = reg
        .start_run_with_client(settings("again", 2), second.clone(), Arc::new(NoopObserver))
        .await
        .unwrap();
    let first_calls = first.calls();
    wait_for_worker(&session).await;

    // The first worker was stopped before the second started.
    assert_eq!(first.calls(), first_calls);
    assert_eq!(
        session.progress().snapshot(),
        ProgressSnapshot { current: 2, total: 2 }
    );
    assert!(matches!(reg.status("again"), RunStatus::Completed { .. }));
}

#[tokio::test]
async fn test_concurrent_restarts_leave_one_worker() {
    let reg = Arc::new(SessionRegistry::in_memory());
    let original = Arc::new(SlowClient::new(10));
    reg.start_run_with_client(settings("race", 100), original.clone(), Arc::new(NoopObserver))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let a = Arc::new(SlowClient::new(5));
    let b = Arc::new(SlowClient::new(5));
    let (first, second) = tokio::join!(
        reg.start_run_with_client(settings("race", 3), a.clone(), Arc::new(NoopObserver)),
        reg.start_run_with_client(settings("race", 3), b.clone(), Arc::new(NoopObserver)),
    );
    first.unwrap();
    let session = second.unwrap();
    let at_start = (a.calls(), b.calls());
    wait_for_worker(&session).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The later start stopped the earlier worker before spawning its own,
    // so exactly one client ran a full three-record run.
    let done = (a.calls(), b.calls());
    assert!(
        (done.0 == 9 && done.1 == at_start.1) || (done.1 == 9 && done.0 == at_start.0),
        "calls at start {at_start:?}, at end {done:?}"
    );
    assert_eq!(
        session.progress().snapshot(),
        ProgressSnapshot { current: 3, total: 3 }
    );
    assert!(matches!(reg.status("race"), RunStatus::Completed { .. }));
}

#[tokio::test]
async fn test_progressing_run_is_not_expired() {
    let reg = Arc::new(SessionRegistry::in_memory());
    let session = reg
        .start_run_with_client(
            settings("busy", 50),
            Arc::new(SlowClient::new(10)),
            Arc::new(NoopObserver),
        )
        .await
        .unwrap();

    // Nobody polls; only the worker's progress keeps the run fresh.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(reg.expire_stale(Duration::from_millis(200)).await, 0);
    assert!(reg.get("busy").is_some());

    reg.request_cancel("busy");
    wait_for_worker(&session).await;
}

#[tokio::test]
async fn test_reset_twice_gives_same_zeroed_state() {
    let reg = SessionRegistry::in_memory();
    let a = reg.reset_for_new_run("idle").await.snapshot();
    let b = reg.reset_for_new_run("idle").await.snapshot();
    assert_eq!(a, b);
    assert_eq!(a.progress, ProgressSnapshot::default());
    assert!(!a.cancelled);
    assert_eq!(a.record_count, 0);
    assert!(a.error.is_none());
}

#[tokio::test]
async fn test_soft_failure_keeps_partial_table() {
    let reg = Arc::new(SessionRegistry::in_memory());
    // Three calls per accepted record; the fourth call fails fatally.
    let session = reg
        .start_run_with_client(
            settings("soft", 4),
            Arc::new(SlowClient::new(1).failing_after(3)),
            Arc::new(NoopObserver),
        )
        .await
        .unwrap();
    wait_for_worker(&session).await;

    match reg.status("soft") {
        RunStatus::Error {
            error_message,
            file: Some(file),
        } => {
            assert!(error_message.contains("403"));
            assert!(file.contains("soft"));
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(session.snapshot().record_count, 1);
}

#[tokio::test]
async fn test_hard_failure_reports_error_without_file() {
    let reg = Arc::new(SessionRegistry::in_memory());
    let session = reg
        .start_run_with_client(
            settings("hard", 2),
            Arc::new(SlowClient::new(1).failing_after(0)),
            Arc::new(NoopObserver),
        )
        .await
        .unwrap();
    wait_for_worker(&session).await;

    match reg.status("hard") {
        RunStatus::Error { error_message, file } => {
            assert!(error_message.contains("quota exhausted"));
            assert_eq!(file, None);
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn test_durable_state_survives_registry_restart() {
    let dir = tempfile::tempdir().unwrap();
    let reg = Arc::new(SessionRegistry::in_memory().with_store(SessionStore::new(dir.path())));
    let session = reg
        .start_run_with_client(
            settings("durable", 2),
            Arc::new(SlowClient::new(1)),
            Arc::new(NoopObserver),
        )
        .await
        .unwrap();
    wait_for_worker(&session).await;
    let file = match reg.status("durable") {
        RunStatus::Completed { file } => file,
        other => panic!("unexpected status {other:?}"),
    };

    let restarted = SessionRegistry::in_memory().with_store(SessionStore::new(dir.path()));
    let artifact = restarted.artifact_for_download("durable", &file).unwrap();
    assert_eq!(artifact.records.len(), 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(restarted.expire_stale(Duration::from_millis(1)).await, 1);
    assert!(!dir.path().join("durable.json").exists());
}
