//! Session id to agent connection mapping.

use std::collections::HashMap;

use crate::hub::ConnectionId;

/// Last-write-wins registry of the agent currently serving each session.
///
/// At most one entry exists per session id. Registering again for the same
/// id replaces the previous connection without touching it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: HashMap<String, ConnectionId>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `connection` as the agent for `session_id`.
    ///
    /// Returns the connection that was replaced, if any.
    pub fn register(
        &mut self,
        session_id: impl Into<String>,
        connection: ConnectionId,
    ) -> Option<ConnectionId> {
        self.entries
            .insert(session_id.into(), connection)
            .filter(|previous| *previous != connection)
    }

    /// Agent connection on record for `session_id`.
    #[must_use]
    pub fn lookup(&self, session_id: &str) -> Option<ConnectionId> {
        self.entries.get(session_id).copied()
    }

    /// Remove the entry for `session_id` only if it still points at `connection`.
    ///
    /// Returns `false` when the entry was already replaced by a newer
    /// registration or never existed.
    pub fn unregister(&mut self, session_id: &str, connection: ConnectionId) -> bool {
        if self.lookup(session_id) == Some(connection) {
            self.entries.remove(session_id);
            true
        } else {
            false
        }
    }

    /// Registered session ids, sorted.
    #[must_use]
    pub fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
