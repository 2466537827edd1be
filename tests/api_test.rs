// tests/api_test.rs — Integration test: HTTP routes over an in-memory registry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use stimgen::api::{build_router, ApiState, EventHub};
use stimgen::client::{
    BackendSettings, ClientError, CompletionParams, FieldSchema, JsonObject, ModelChoice,
    ModelClient,
};
use stimgen::pipeline::{Ablation, LogChannel, RunSettings};
use stimgen::session::{NoopObserver, RunObserver, RunStatus, SessionRegistry};

struct WordClient;

#[async_trait]
impl ModelClient for WordClient {
    fn id(&self) -> &str {
        "words"
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
        let value = if prompt.starts_with("Please help me construct") {
            json!({"word": format!("w{}", prompt.len())})
        } else if prompt.starts_with("Please verify") {
            json!({"ok": true})
        } else {
            json!({"concreteness": 4})
        };
        Ok(value.as_object().cloned().unwrap())
    }
}

fn state() -> ApiState {
    ApiState {
        registry: Arc::new(SessionRegistry::in_memory()),
        events: Arc::new(EventHub::default()),
        cleanup_delay: Duration::from_millis(50),
    }
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn finish_run(state: &ApiState, run_id: &str, iterations: usize) -> String {
    let settings = RunSettings {
        run_id: run_id.into(),
        experiment_design: "Concrete nouns".into(),
        iterations,
        model_choice: ModelChoice::Custom,
        generator_schema: FieldSchema::default(),
        validator_schema: FieldSchema::default(),
        scorer_schema: FieldSchema::default(),
        previous_stimuli: vec![],
        backend: BackendSettings::default(),
        params: None,
        ablation: Ablation::default(),
    };
    let session = state
        .registry
        .start_run_with_client(settings, Arc::new(WordClient), Arc::new(NoopObserver))
        .await
        .unwrap();
    for _ in 0..200 {
        if !session.snapshot().worker_running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    match state.registry.status(run_id) {
        RunStatus::Completed { file } => file,
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send_json(build_router(state()), get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "stimgen");
}

#[tokio::test]
async fn test_status_of_unknown_run_is_running_at_zero() {
    let (status, body) = send_json(build_router(state()), get("/api/v1/runs/fresh/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "running", "progress": 0}));
}

#[tokio::test]
async fn test_generate_rejects_bad_requests() {
    let st = state();
    let cases = [
        (
            json!({"iteration": 2, "modelChoice": "GPT-4o"}),
            "Missing required field: experimentDesign",
        ),
        (
            json!({"experimentDesign": "d", "iteration": -1, "modelChoice": "GPT-4o"}),
            "Iteration must be a positive integer",
        ),
        (
            json!({"experimentDesign": "d", "iteration": 1}),
            "Please select a model",
        ),
        (
            json!({"experimentDesign": "d", "iteration": 1, "modelChoice": "custom"}),
            "Invalid run settings: custom model requires an API URL",
        ),
    ];
    for (body, expected) in cases {
        let (status, resp) = send_json(
            build_router(st.clone()),
            post_json("/api/v1/runs/r1/generate", body),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["error"], expected);
    }
}

#[tokio::test]
async fn test_generate_without_json_body() {
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/runs/r1/generate")
        .body(Body::empty())
        .unwrap();
    let (status, resp) = send_json(build_router(state()), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"], "Missing request data");
}

#[tokio::test]
async fn test_generate_starts_run() {
    let st = state();
    let body = json!({
        "experimentDesign": "Concrete nouns",
        "iteration": "2",
        "modelChoice": "ollama",
        "apiUrl": "http://127.0.0.1:9",
    });
    let (status, resp) =
        send_json(build_router(st.clone()), post_json("/api/v1/runs/go-1/generate", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status"], "success");
    assert_eq!(resp["total_iterations"], 2);
    assert!(st.registry.get("go-1").is_some());

    // Nothing listens on port 9; stop the retrying worker.
    st.registry.remove("go-1").await;
}

#[tokio::test]
async fn test_stop_reports_stopped() {
    let st = state();
    let (status, resp) = send_json(
        build_router(st.clone()),
        post_json("/api/v1/runs/s1/stop", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["message"], "Stimulus generation successfully stopped.");

    let (_, body) = send_json(build_router(st), get("/api/v1/runs/s1/status")).await;
    assert_eq!(body, json!({"status": "stopped"}));
}

#[tokio::test]
async fn test_download_without_data_is_404() {
    let (status, resp) = send_json(
        build_router(state()),
        get("/api/v1/runs/none/download/experiment_stimuli_results_none_1_abcdef.csv"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(resp["error"], "No data available for download.");
}

#[tokio::test]
async fn test_download_serves_csv_once() {
    let st = state();
    let file = finish_run(&st, "dl-1", 2).await;

    let (status, resp) = send_json(
        build_router(st.clone()),
        get("/api/v1/runs/dl-1/download/some_other_file.csv"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["error"], "Requested file does not match current session file");

    let resp = build_router(st.clone())
        .oneshot(get(&format!("/api/v1/runs/dl-1/download/{file}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv");
    let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains(&file));

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(body.to_vec()).unwrap();
    let mut lines = csv.lines();
    let header_line = lines.next().unwrap();
    assert!(header_line.starts_with("stimulus_id,"));
    assert!(header_line.ends_with("download_timestamp"));
    assert_eq!(lines.count(), 2);

    // Cleared shortly after being served.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let (status, _) = send(
        build_router(st),
        get(&format!("/api/v1/runs/dl-1/download/{file}")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_events_stream_filters_by_run() {
    let st = state();
    let resp = build_router(st.clone())
        .oneshot(get("/api/v1/runs/ev-1/events"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    st.events.on_log("other-run", LogChannel::All, "not for us");
    st.events.on_log("ev-1", LogChannel::Generator, "Generator's Output: {}");

    let mut frames = resp.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.contains("event: stimulus_update"));
    assert!(text.contains("\"type\":\"generator\""));
    assert!(!text.contains("not for us"));
}
