//! Router assembly and shared state.

use std::sync::Arc;

use axum::{Router, routing::get};
use session_relay_core::HubHandle;
use session_relay_store::MetadataStore;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{AgentSupervisor, Launcher, api, websocket::ws_handler};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Running hub actor.
    pub hub: HubHandle,
    /// Session/event metadata.
    pub store: Arc<dyn MetadataStore>,
    /// Launched agent processes.
    pub agents: Arc<AgentSupervisor>,
}

impl AppState {
    /// Build state around an already spawned hub.
    #[must_use]
    pub fn new(
        hub: HubHandle,
        store: Arc<dyn MetadataStore>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            hub,
            store,
            agents: Arc::new(AgentSupervisor::new(launcher)),
        }
    }
}

/// Full HTTP + WebSocket router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .nest("/api", api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
///
/// # Errors
/// Returns error if the listener fails.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
