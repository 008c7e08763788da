//! Hub connection for one session.

use futures::{SinkExt, StreamExt};
use session_relay_core::{Envelope, MessageType};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{Shell, exec::run_command};

/// Bridge error. Every variant means the hub link is gone.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to connect to hub at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    #[error("Hub connection error: {0}")]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Hub closed the connection")]
    Closed,
}

/// Where the bridge is in its lifecycle. Transitions are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    Disconnected,
    Connecting,
    Registered,
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// WebSocket URL of the hub.
    pub hub_url: String,
    /// Session this bridge serves.
    pub session_id: String,
    /// Shell that interprets command text.
    pub shell: Shell,
}

/// Binds one hub connection to one session and executes its commands.
///
/// Each matching `command` envelope spawns its own subprocess; several may
/// run at once and their output interleaves in arrival order.
pub struct AgentBridge {
    config: BridgeConfig,
    state: BridgeState,
}

impl AgentBridge {
    /// Create a disconnected bridge.
    #[must_use]
    pub const fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            state: BridgeState::Disconnected,
        }
    }

    /// Connect, register and serve commands until the hub link drops.
    ///
    /// # Errors
    /// Always returns an error eventually: losing the hub is fatal.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        let result = self.serve().await;
        self.transition(BridgeState::Disconnected);
        result
    }

    async fn serve(&mut self) -> Result<(), BridgeError> {
        let url = self.config.hub_url.clone();
        let session_id = self.config.session_id.clone();

        self.transition(BridgeState::Connecting);
        let (socket, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| BridgeError::Connect {
                    url: url.clone(),
                    source: Box::new(e),
                })?;
        tracing::info!(session_id = %session_id, %url, "Connected to hub");

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

        let send_task = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let json = match envelope.to_json() {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {e}");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        let _ = tx.send(Envelope::register(session_id.as_str()));

        let result = loop {
            let Some(msg) = stream.next().await else {
                break Err(BridgeError::Closed);
            };
            let parsed = match msg {
                Ok(Message::Text(text)) => Envelope::parse(text.as_str()),
                Ok(Message::Binary(data)) => Envelope::parse_bytes(&data),
                Ok(Message::Close(_)) => break Err(BridgeError::Closed),
                Ok(_) => continue,
                Err(e) => break Err(BridgeError::Transport(Box::new(e))),
            };

            match parsed {
                Ok(envelope) => self.handle(envelope, &tx),
                Err(e) => tracing::warn!("Invalid message from hub: {e}"),
            }
        };

        send_task.abort();
        result
    }

    fn handle(&mut self, envelope: Envelope, tx: &mpsc::UnboundedSender<Envelope>) {
        let own = self.config.session_id.as_str();
        match envelope.message_type() {
            Some(MessageType::Command) => {
                if envelope.session() != Some(own) {
                    tracing::debug!(target_session = ?envelope.session_id, "Ignoring command for another session");
                    return;
                }
                let Some(command) = envelope.command else {
                    tracing::warn!("Command envelope without command text");
                    return;
                };

                tracing::info!(session_id = %own, %command, "Executing command");
                let shell = self.config.shell.clone();
                let session_id = own.to_string();
                let tx = tx.clone();
                tokio::spawn(async move {
                    run_command(&shell, &session_id, &command, &tx).await;
                });
            }
            Some(MessageType::Registered) => {
                self.transition(BridgeState::Registered);
            }
            Some(MessageType::Error) => {
                tracing::warn!(error = ?envelope.error, "Hub reported an error");
            }
            _ => {
                tracing::debug!(kind = %envelope.kind, "Ignoring message");
            }
        }
    }

    fn transition(&mut self, next: BridgeState) {
        if self.state != next {
            tracing::info!(
                session_id = %self.config.session_id,
                from = ?self.state,
                to = ?next,
                "Bridge state changed"
            );
            self.state = next;
        }
    }
}
