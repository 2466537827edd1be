// src/cli/serve.rs — `stimgen serve`

use crate::api::{self, ApiState};
use crate::infra::config::Config;

/// Start the API with optional host/port overrides.
pub async fn run_serve(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = ApiState::new(&config);
    tracing::info!(
        persist = config.sessions.persist,
        dir = %config.sessions.resolved_dir().display(),
        "Session storage"
    );
    api::start_server(&config, state).await
}
