//! Network surface of the session relay.
//!
//! Provides:
//! - WebSocket endpoint feeding the hub (`/` and `/ws`)
//! - Session/event metadata REST API (`/api/sessions`, `/api/events`)
//! - Agent launcher (`/api/agents/{sessionId}/start`)

pub mod api;
pub mod app;
pub mod config;
pub mod launcher;
pub mod websocket;

pub use app::{AppState, router, serve};
pub use config::HubConfig;
pub use launcher::{AgentSupervisor, LaunchError, LaunchedAgent, Launcher, ProcessLauncher};
