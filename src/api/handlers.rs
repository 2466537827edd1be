// src/api/handlers.rs

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::broadcast::error::RecvError;

use crate::api::{types::*, ApiState};
use crate::pipeline::export::to_csv_with;
use crate::pipeline::LogChannel;
use crate::session::store::is_valid_run_id;
use crate::session::{DownloadError, RunObserver, RunStatus};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn check_run_id(run_id: &str) -> Result<(), ApiError> {
    if is_valid_run_id(run_id) {
        Ok(())
    } else {
        Err(error(StatusCode::BAD_REQUEST, "Invalid run id"))
    }
}

/// GET /api/v1/health — Simple health check.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: "stimgen".into(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// POST /api/v1/runs/:run_id/generate — Reset the run and start a new one.
pub async fn generate(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateStartedResponse>, ApiError> {
    check_run_id(&run_id)?;
    let Json(body) = body.map_err(|e| match e {
        JsonRejection::MissingJsonContentType(_) => {
            error(StatusCode::BAD_REQUEST, "Missing request data")
        }
        other => error(StatusCode::BAD_REQUEST, format!("Invalid request body: {other}")),
    })?;

    let settings = body
        .into_settings(&run_id)
        .map_err(|message| error(StatusCode::BAD_REQUEST, message))?;
    let total_iterations = settings.iterations;
    tracing::info!(run_id = %run_id, iterations = total_iterations, "Generation requested");

    let observer: Arc<dyn RunObserver> = state.events.clone();
    state
        .registry
        .start_run(settings, observer)
        .await
        .map_err(|e| {
            if e.is_user_error() {
                error(StatusCode::BAD_REQUEST, e.to_string())
            } else {
                tracing::error!(run_id = %run_id, "Failed to start run: {}", e);
                error(StatusCode::INTERNAL_SERVER_ERROR, format!("Server error: {e}"))
            }
        })?;

    Ok(Json(GenerateStartedResponse {
        status: "success".into(),
        message: "Stimulus generation started.".into(),
        run_id,
        total_iterations,
    }))
}

/// GET /api/v1/runs/:run_id/status — Poll a run.
pub async fn status(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, ApiError> {
    check_run_id(&run_id)?;
    Ok(Json(state.registry.status(&run_id)))
}

/// POST /api/v1/runs/:run_id/stop — Request cancellation.
pub async fn stop(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    check_run_id(&run_id)?;
    state.registry.request_cancel(&run_id);
    state
        .events
        .on_log(&run_id, LogChannel::All, "Stopping... Please wait.");
    Ok(Json(MessageResponse {
        message: "Stimulus generation successfully stopped.".into(),
    }))
}

/// GET /api/v1/runs/:run_id/download/:filename — Serve the run's table as CSV.
pub async fn download(
    State(state): State<ApiState>,
    Path((run_id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    check_run_id(&run_id)?;
    let artifact = state
        .registry
        .artifact_for_download(&run_id, &filename)
        .map_err(|e| match e {
            DownloadError::NoData => error(StatusCode::NOT_FOUND, "No data available for download."),
            DownloadError::NameMismatch => error(
                StatusCode::BAD_REQUEST,
                "Requested file does not match current session file",
            ),
            DownloadError::WrongRun => error(
                StatusCode::BAD_REQUEST,
                "Invalid file request: session ID mismatch",
            ),
        })?;

    let downloaded_at = chrono::Utc::now().timestamp().to_string();
    let csv = to_csv_with(&artifact, &[("download_timestamp", downloaded_at)]);
    tracing::info!(
        run_id = %run_id,
        file = %filename,
        rows = artifact.records.len(),
        "Serving download"
    );

    // Later downloads must not serve a stale table.
    let registry = state.registry.clone();
    let delay = state.cleanup_delay;
    let cleanup_run = run_id.clone();
    let cleanup_file = filename.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        registry.clear_artifact_if(&cleanup_run, &cleanup_file);
    });

    let headers = [
        (header::CONTENT_TYPE, "text/csv".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, csv).into_response())
}

/// GET /api/v1/runs/:run_id/events — Server-sent log and progress events.
pub async fn events(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    check_run_id(&run_id)?;
    let mut rx = state.events.subscribe();

    let event_stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.run_id() != run_id {
                        continue;
                    }
                    let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                    yield Ok(SseEvent::default().event(event.name()).data(payload));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(run_id = %run_id, skipped, "Event subscriber lagged; dropping old events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}
