//! Startup helpers for the Taskline agent server.
//!
//! Wires the configuration, the Ollama engine, the shared state, the
//! retention sweeper, and the HTTP server into one bootstrap.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crate::agent::OllamaAgentEngine;
use crate::chat::core::config::ChatConfig;
use crate::chat::maintenance::RetentionSweeper;
use crate::server::{self, AppState};

/// Environment variable for the server port.
const PORT_ENV: &str = "TASKLINE_PORT";
/// Environment variable for the `SQLite` database path.
const DB_PATH_ENV: &str = "TASKLINE_DB_PATH";

/// Run the server (used by the `taskline-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Taskline Agent v{}", env!("CARGO_PKG_VERSION"));

    let config = config_from_env();
    let port = get_port();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config, port)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn serve(
    config: ChatConfig,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let engine = Arc::new(OllamaAgentEngine::from_env());
    tracing::info!(model = engine.model(), "Ollama engine configured");

    let retention = config.retention.clone();
    let state = AppState::new(config, engine)
        .await
        .map_err(|e| format!("Failed to create state: {e}"))?;

    let sweeper = RetentionSweeper::new(state.store.clone(), retention);
    let sweeper_shutdown = sweeper.shutdown_notifier();
    let sweeper_handle = sweeper.spawn();

    server::run_server_with_shutdown(state, port, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
        }
        tracing::info!("Shutdown signal received");
    })
    .await?;

    sweeper_shutdown.notify_one();
    sweeper_handle.await?;

    Ok(())
}

/// Build the chat configuration from the environment.
#[must_use]
pub fn config_from_env() -> ChatConfig {
    let mut config = ChatConfig::default();
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        config.storage.sqlite_path = PathBuf::from(path);
    }
    config
}

/// Get configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}
