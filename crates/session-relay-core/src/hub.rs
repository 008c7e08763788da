//! Connection hub: classifies connections and routes envelopes.
//!
//! All routing state (registry, frontend set, outbound senders) is owned by a
//! single [`Hub`] value. In production it runs inside one actor task spawned by
//! [`HubHandle::spawn`], so every inbound frame is handled to completion before
//! the next one and no lock is needed.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{
    SessionRegistry,
    protocol::{AGENT_NOT_CONNECTED, Envelope, EnvelopeError, INVALID_JSON, MessageType},
};

/// Error text for a `register` sent by a connection already acting as a frontend.
pub const ALREADY_FRONTEND: &str = "Connection already classified as frontend";

/// Error text for an agent trying to switch session id.
pub const SESSION_ALREADY_BOUND: &str = "Session id already bound";

/// Channel on which the hub delivers envelopes to one connection.
pub type Outbound = mpsc::UnboundedSender<Envelope>;

/// Opaque identifier of one hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Role of a connection, decided by its first valid message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Nothing valid received yet. Already a broadcast target.
    Unclassified,
    /// Observer/issuer of commands.
    Frontend,
    /// Agent bound to one session id for the rest of its life.
    Agent { session_id: String },
}

/// Input to the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// A transport accepted a new connection.
    Connected { id: ConnectionId, outbound: Outbound },
    /// A frame arrived, already parsed by the connection's reader.
    Frame {
        id: ConnectionId,
        frame: Result<Envelope, EnvelopeError>,
    },
    /// The connection closed.
    Disconnected { id: ConnectionId },
    /// Ask for a snapshot of the hub's bookkeeping.
    Stats { reply: oneshot::Sender<HubStats> },
}

/// Result of routing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the registered agent's channel.
    Delivered,
    /// No agent registered, or its channel is already closed.
    NoAgent,
}

/// Snapshot of hub bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Open connections of any role.
    pub connections: usize,
    /// Broadcast targets (frontends plus unclassified connections).
    pub frontends: usize,
    /// Session ids with a registered agent, sorted.
    pub agents: Vec<String>,
}

struct Connection {
    role: Role,
    outbound: Outbound,
}

/// Routing state machine.
#[derive(Default)]
pub struct Hub {
    connections: HashMap<ConnectionId, Connection>,
    registry: SessionRegistry,
    frontends: HashSet<ConnectionId>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one event to completion.
    pub fn dispatch(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected { id, outbound } => self.on_connect(id, outbound),
            HubEvent::Frame { id, frame } => self.on_frame(id, frame),
            HubEvent::Disconnected { id } => self.on_disconnect(id),
            HubEvent::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Current role of a connection.
    #[must_use]
    pub fn role(&self, id: ConnectionId) -> Option<&Role> {
        self.connections.get(&id).map(|c| &c.role)
    }

    /// Snapshot of connection counts and registered sessions.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            frontends: self.frontends.len(),
            agents: self.registry.sessions(),
        }
    }

    fn on_connect(&mut self, id: ConnectionId, outbound: Outbound) {
        tracing::info!(connection = %id, "Connection opened");
        self.connections.insert(
            id,
            Connection {
                role: Role::Unclassified,
                outbound,
            },
        );
        self.frontends.insert(id);
    }

    fn on_disconnect(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };
        self.frontends.remove(&id);

        if let Role::Agent { session_id } = conn.role {
            if self.registry.unregister(&session_id, id) {
                tracing::info!(connection = %id, session_id = %session_id, "Agent unregistered");
            } else {
                tracing::debug!(
                    connection = %id,
                    session_id = %session_id,
                    "Superseded agent closed, registry untouched"
                );
            }
        } else {
            tracing::info!(connection = %id, "Connection closed");
        }
    }

    fn on_frame(&mut self, id: ConnectionId, frame: Result<Envelope, EnvelopeError>) {
        let envelope = match frame {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(connection = %id, "Invalid frame: {e}");
                self.reply(id, Envelope::error(INVALID_JSON));
                return;
            }
        };

        let Some(role) = self.role(id).cloned() else {
            tracing::warn!(connection = %id, "Frame from unknown connection dropped");
            return;
        };

        tracing::debug!(connection = %id, kind = %envelope.kind, "Frame received");

        if envelope.is(MessageType::Register) {
            if let Some(session_id) = envelope.session() {
                self.on_register(id, &role, session_id.to_string());
                return;
            }
            if matches!(role, Role::Agent { .. }) {
                tracing::warn!(connection = %id, "Register without sessionId from agent dropped");
                return;
            }
        }

        if role == Role::Unclassified {
            self.set_role(id, Role::Frontend);
        }

        if envelope.is(MessageType::Command) {
            self.on_command(id, &envelope);
            return;
        }

        if matches!(role, Role::Agent { .. }) {
            let delivered = self.broadcast(&envelope);
            tracing::debug!(connection = %id, delivered, "Agent message broadcast");
        } else {
            tracing::debug!(connection = %id, kind = %envelope.kind, "Ignoring message from non-agent");
        }
    }

    fn on_register(&mut self, id: ConnectionId, role: &Role, session_id: String) {
        match role {
            Role::Frontend => {
                tracing::warn!(connection = %id, "Register from frontend rejected");
                self.reply(id, Envelope::error(ALREADY_FRONTEND));
                return;
            }
            Role::Agent { session_id: bound } if *bound != session_id => {
                tracing::warn!(
                    connection = %id,
                    bound = %bound,
                    requested = %session_id,
                    "Agent tried to switch session id"
                );
                self.reply(id, Envelope::error(SESSION_ALREADY_BOUND));
                return;
            }
            Role::Unclassified | Role::Agent { .. } => {}
        }

        self.set_role(
            id,
            Role::Agent {
                session_id: session_id.clone(),
            },
        );
        self.frontends.remove(&id);

        if let Some(previous) = self.registry.register(session_id.clone(), id) {
            tracing::info!(
                connection = %id,
                previous = %previous,
                session_id = %session_id,
                "Agent registration replaced previous agent"
            );
        } else {
            tracing::info!(connection = %id, session_id = %session_id, "Agent registered");
        }

        self.reply(id, Envelope::registered(session_id));
    }

    fn on_command(&self, id: ConnectionId, envelope: &Envelope) {
        let (Some(session_id), Some(command)) = (
            envelope.session(),
            envelope.command.as_deref().filter(|c| !c.is_empty()),
        ) else {
            tracing::warn!(connection = %id, "Command without sessionId or command dropped");
            return;
        };

        tracing::debug!(connection = %id, session_id = %session_id, "Routing command");
        if self.route(session_id, Envelope::command(session_id, command)) == RouteOutcome::NoAgent {
            tracing::debug!(connection = %id, session_id = %session_id, "No agent for command");
            self.reply(id, Envelope::error(AGENT_NOT_CONNECTED));
        }
    }

    /// Deliver `envelope` to the agent registered for `session_id`.
    pub fn route(&self, session_id: &str, envelope: Envelope) -> RouteOutcome {
        let Some(conn) = self
            .registry
            .lookup(session_id)
            .and_then(|agent| self.connections.get(&agent))
        else {
            return RouteOutcome::NoAgent;
        };

        match conn.outbound.send(envelope) {
            Ok(()) => RouteOutcome::Delivered,
            Err(_) => RouteOutcome::NoAgent,
        }
    }

    /// Send `envelope` to every frontend. Closed targets are skipped.
    ///
    /// Returns how many targets accepted it.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        self.frontends
            .iter()
            .filter_map(|id| self.connections.get(id))
            .filter(|conn| conn.outbound.send(envelope.clone()).is_ok())
            .count()
    }

    fn reply(&self, id: ConnectionId, envelope: Envelope) {
        if let Some(conn) = self.connections.get(&id) {
            let _ = conn.outbound.send(envelope);
        }
    }

    fn set_role(&mut self, id: ConnectionId, role: Role) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.role = role;
        }
    }
}

/// Cloneable handle feeding events into a running hub actor.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    /// Spawn a hub actor on the current Tokio runtime.
    ///
    /// The actor stops once every handle has been dropped.
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut hub = Hub::new();
            while let Some(event) = rx.recv().await {
                hub.dispatch(event);
            }
            tracing::debug!("Hub actor stopped");
        });
        Self { tx }
    }

    /// Register a new connection.
    ///
    /// Returns its id and the receiver of envelopes addressed to it.
    #[must_use]
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Envelope>) {
        let id = ConnectionId::new();
        let (outbound, rx) = mpsc::unbounded_channel();
        self.send(HubEvent::Connected { id, outbound });
        (id, rx)
    }

    /// Submit a text frame received on `id`.
    pub fn text(&self, id: ConnectionId, text: &str) {
        self.send(HubEvent::Frame {
            id,
            frame: Envelope::parse(text),
        });
    }

    /// Submit a binary frame received on `id`.
    pub fn binary(&self, id: ConnectionId, bytes: &[u8]) {
        self.send(HubEvent::Frame {
            id,
            frame: Envelope::parse_bytes(bytes),
        });
    }

    /// Report that `id` closed.
    pub fn disconnect(&self, id: ConnectionId) {
        self.send(HubEvent::Disconnected { id });
    }

    /// Ask the actor for a snapshot.
    ///
    /// Returns `None` if the actor has stopped.
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Stats { reply });
        rx.await.ok()
    }

    fn send(&self, event: HubEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!("Hub actor is not running");
        }
    }
}
