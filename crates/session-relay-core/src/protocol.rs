//! Wire envelope shared by frontends, agents and the hub.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error text sent back when a frame cannot be parsed as an envelope.
pub const INVALID_JSON: &str = "Invalid JSON";

/// Error text sent back when a command targets a session with no agent.
pub const AGENT_NOT_CONNECTED: &str = "Agent not connected";

/// Envelope parse error.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Frame is not valid UTF-8")]
    NotUtf8,
}

/// Envelope types understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Agent binds its connection to a session id.
    Register,
    /// Hub acknowledges a registration.
    Registered,
    /// Shell command addressed to a session's agent.
    Command,
    /// One chunk of stdout.
    Output,
    /// Error text, or one chunk of stderr when sent by an agent.
    Error,
    /// Process exit notice.
    Close,
}

impl MessageType {
    /// Wire name of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Registered => "registered",
            Self::Command => "command",
            Self::Output => "output",
            Self::Error => "error",
            Self::Close => "close",
        }
    }

    /// Look up a type by its wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "register" => Some(Self::Register),
            "registered" => Some(Self::Registered),
            "command" => Some(Self::Command),
            "output" => Some(Self::Output),
            "error" => Some(Self::Error),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routed protocol message.
///
/// Only `type` is required. Fields the relay does not know about are kept in
/// `extra` so that agent messages are re-broadcast without losing data. A
/// known field holding a non-string value is kept in `extra` as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Envelope {
    /// Wire type, kept as text so unknown types survive a round trip.
    #[serde(rename = "type")]
    pub kind: String,

    /// Target or source session.
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Shell command text (`command` envelopes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Payload text (`output`, `error` and `close` envelopes from agents).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Error text produced by the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Any other fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TryFrom<Map<String, Value>> for Envelope {
    type Error = &'static str;

    fn try_from(mut extra: Map<String, Value>) -> Result<Self, Self::Error> {
        let Some(Value::String(kind)) = extra.remove("type") else {
            return Err("missing string field `type`");
        };
        Ok(Self {
            kind,
            session_id: take_string(&mut extra, "sessionId"),
            command: take_string(&mut extra, "command"),
            content: take_string(&mut extra, "content"),
            error: take_string(&mut extra, "error"),
            extra,
        })
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        other => {
            map.insert(key.to_string(), other);
            None
        }
    }
}

impl Envelope {
    fn new(kind: MessageType) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            session_id: None,
            command: None,
            content: None,
            error: None,
            extra: Map::new(),
        }
    }

    fn with_session(kind: MessageType, session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::new(kind)
        }
    }

    /// `register{sessionId}` sent by an agent on connect.
    #[must_use]
    pub fn register(session_id: impl Into<String>) -> Self {
        Self::with_session(MessageType::Register, session_id)
    }

    /// `registered{sessionId}` acknowledgement.
    #[must_use]
    pub fn registered(session_id: impl Into<String>) -> Self {
        Self::with_session(MessageType::Registered, session_id)
    }

    /// `command{sessionId, command}`.
    #[must_use]
    pub fn command(session_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::with_session(MessageType::Command, session_id)
        }
    }

    /// `output{sessionId, content}` carrying a stdout chunk.
    #[must_use]
    pub fn output(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_session(MessageType::Output, session_id)
        }
    }

    /// `error{sessionId, content}` carrying a stderr chunk.
    #[must_use]
    pub fn stderr(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_session(MessageType::Error, session_id)
        }
    }

    /// `close{sessionId, content}` exit notice.
    #[must_use]
    pub fn close(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_session(MessageType::Close, session_id)
        }
    }

    /// `error{error}` reply produced by the hub.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(MessageType::Error)
        }
    }

    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON object with a string `type`.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a binary frame as UTF-8 text.
    ///
    /// # Errors
    /// Returns error if the bytes are not UTF-8 or not a valid envelope.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::NotUtf8)?;
        Self::parse(text)
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Known type of this envelope, if any.
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire(&self.kind)
    }

    /// Whether this envelope has the given type.
    #[must_use]
    pub fn is(&self, kind: MessageType) -> bool {
        self.kind == kind.as_str()
    }

    /// Session id, treating an empty string as absent.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|s| !s.is_empty())
    }
}
