//! Hub configuration.

use std::path::PathBuf;

use clap::Parser;

/// Name of the agent executable shipped next to the hub.
const AGENT_BINARY: &str = "relay-agent";

/// Relay hub: routes shell commands from browsers to per-session agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "relay-hub", version)]
pub struct HubConfig {
    /// Interface to listen on.
    #[arg(long, env = "RELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port for both HTTP and WebSocket traffic.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Agent executable started by `POST /api/agents/{sessionId}/start`.
    #[arg(long, env = "RELAY_AGENT_PROGRAM")]
    pub agent_program: Option<PathBuf>,

    /// WebSocket URL handed to launched agents.
    #[arg(long, env = "RELAY_PUBLIC_URL")]
    pub public_url: Option<String>,
}

impl HubConfig {
    /// `host:port` to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL agents should dial.
    #[must_use]
    pub fn hub_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("ws://{}", self.bind_addr()))
    }

    /// Agent executable: explicit setting, then a sibling of the running
    /// binary, then plain `relay-agent` looked up on `PATH` at spawn time.
    #[must_use]
    pub fn agent_program(&self) -> PathBuf {
        if let Some(program) = &self.agent_program {
            return program.clone();
        }

        let file_name = format!("{AGENT_BINARY}{}", std::env::consts::EXE_SUFFIX);
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
            .filter(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(file_name))
    }
}
