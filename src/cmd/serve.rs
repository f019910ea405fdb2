//! HTTP API server command — `mender serve`.

use std::sync::Arc;

use anyhow::Result;

use mender::config::MenderConfig;
use mender::healer::api::AppState;
use mender::healer::{self, server};

pub async fn cmd_serve(
    mut config: MenderConfig,
    port: Option<u16>,
    dev: bool,
    github_token: Option<String>,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    config.server.dev_mode |= dev;
    config.ensure_valid()?;

    if github_token.as_deref().is_none_or(|t| t.trim().is_empty()) {
        tracing::warn!("GITHUB_TOKEN is not set; forks will fail until it is provided");
    }

    let orchestrator = healer::assemble(&config, github_token);
    tracing::info!(
        iteration_budget = orchestrator.iteration_budget(),
        results = %config.orchestrator.results_path.display(),
        "orchestrator ready"
    );

    server::start_server(&config.server, Arc::new(AppState { orchestrator })).await
}
