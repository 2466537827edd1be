// src/api/mod.rs — HTTP API over the run registry

pub mod events;
pub mod handlers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::infra::config::Config;
use crate::session::SessionRegistry;
pub use events::{EventHub, RunEvent};
pub use types::GenerateRequest;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub events: Arc<EventHub>,
    /// How long a downloaded artifact stays available before it is cleared.
    pub cleanup_delay: Duration,
}

impl ApiState {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(config)),
            events: Arc::new(EventHub::new(&config.events)),
            cleanup_delay: Duration::from_secs(2),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:5000"),
            HeaderValue::from_static("http://localhost:5173"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://127.0.0.1:5000"),
            HeaderValue::from_static("http://127.0.0.1:5173"),
        ])
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/runs/{run_id}/generate", post(handlers::generate))
        .route("/api/v1/runs/{run_id}/status", get(handlers::status))
        .route("/api/v1/runs/{run_id}/stop", post(handlers::stop))
        .route(
            "/api/v1/runs/{run_id}/download/{filename}",
            get(handlers::download),
        )
        .route("/api/v1/runs/{run_id}/events", get(handlers::events))
        .layer(cors)
        .with_state(state)
}

/// Remove expired runs now and then on every sweep interval.
pub fn spawn_expiry_sweep(
    registry: Arc<SessionRegistry>,
    max_age: Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            // The first tick completes immediately.
            interval.tick().await;
            let removed = registry.expire_stale(max_age).await;
            if removed > 0 {
                tracing::info!(removed, "Expired sessions swept");
            }
        }
    })
}

/// Start the API server (blocking).
pub async fn start_server(config: &Config, state: ApiState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let sweep = spawn_expiry_sweep(
        state.registry.clone(),
        config.sessions.max_age(),
        Duration::from_secs(config.sessions.sweep_interval_seconds),
    );

    let router = build_router(state);

    tracing::info!("API server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await;
    sweep.abort();
    served?;
    Ok(())
}
