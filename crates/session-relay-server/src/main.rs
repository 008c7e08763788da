//! Relay hub server.
//!
//! Run with: relay-hub --port 3000
//!
//! Frontends and agents connect to ws://localhost:3000.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use session_relay_core::HubHandle;
use session_relay_server::{AppState, HubConfig, ProcessLauncher, serve};
use session_relay_store::MemoryStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = HubConfig::parse();

    let launcher = ProcessLauncher::new(config.agent_program(), config.hub_url());
    let state = AppState::new(
        HubHandle::spawn(),
        Arc::new(MemoryStore::new()),
        Arc::new(launcher),
    );

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Hub listening on http://{addr} (WebSocket at ws://{addr})");

    serve(listener, state, shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
