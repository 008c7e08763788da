//! Session agent.
//!
//! Run with: relay-agent <session-id> --hub-url ws://localhost:3000

use anyhow::Context;
use clap::Parser;
use session_relay_agent::{AgentBridge, BridgeConfig, Shell};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Execute relayed shell commands for one session.
#[derive(Debug, Parser)]
#[command(name = "relay-agent", version)]
struct Args {
    /// Session this agent serves.
    #[arg(default_value = "session-1")]
    session_id: String,

    /// WebSocket URL of the hub.
    #[arg(long, env = "RELAY_HUB_URL", default_value = "ws://localhost:3000")]
    hub_url: String,

    /// Shell used to interpret commands (default: /bin/sh, or cmd on Windows).
    #[arg(long, env = "RELAY_SHELL")]
    shell: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let shell = match args.shell.as_deref() {
        Some(name) => Shell::resolve(name)
            .await
            .with_context(|| format!("cannot use shell {name:?}"))?,
        None => Shell::platform_default(),
    };

    let bridge = AgentBridge::new(BridgeConfig {
        hub_url: args.hub_url,
        session_id: args.session_id,
        shell,
    });

    bridge.run().await.context("agent bridge stopped")
}
