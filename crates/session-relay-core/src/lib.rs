//! Core building blocks for the session relay.
//!
//! This crate provides:
//! - `Envelope` - The JSON message exchanged between frontends, agents and the hub
//! - `SessionRegistry` - Last-write-wins mapping of session id to agent connection
//! - `Hub` - Single-owner dispatcher that classifies connections and routes envelopes
//!
//! Nothing here knows about sockets. Transports feed [`HubEvent`]s into a
//! [`HubHandle`] and drain each connection's outbound channel.

pub mod hub;
pub mod protocol;
pub mod registry;

pub use hub::{ConnectionId, Hub, HubEvent, HubHandle, HubStats, Outbound, Role, RouteOutcome};
pub use protocol::{Envelope, EnvelopeError, MessageType};
pub use registry::SessionRegistry;
