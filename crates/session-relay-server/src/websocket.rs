//! WebSocket transport for frontends and agents.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use session_relay_core::HubHandle;

use crate::AppState;

/// WebSocket upgrade handler.
///
/// Frontends and agents share this endpoint; the hub tells them apart by
/// their first message.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = hub.connect();

    // Forward hub output to the socket
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match envelope.to_json() {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => hub.text(id, text.as_str()),
            Ok(Message::Binary(data)) => hub.binary(id, &data),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection = %id, "WebSocket error: {e}");
                break;
            }
        }
    }

    hub.disconnect(id);
    send_task.abort();
}
