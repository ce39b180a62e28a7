use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Category of a decoded server event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// New chat message
    Message,
    /// Server liveness check
    Ping,
    /// Reply to one of our pings (or any id-keyed response)
    Pong,
    /// Server configuration change, auth rejection, or an unknown method
    ConfigUpdate,
    /// User went online/offline
    UserStatus,
}

impl EventKind {
    /// Kinds a bounded dispatcher may discard under overload.
    pub fn is_evictable(&self) -> bool {
        matches!(self, EventKind::ConfigUpdate | EventKind::UserStatus)
    }
}

/// Public output of the pull client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub payload: Map<String, Value>,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, channel_id: Option<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            channel_id,
            payload,
            received_at: Utc::now(),
        }
    }

    /// The distinguished event raised when the server refuses our session.
    ///
    /// Consumers should ask the auth collaborator for fresh credentials; the
    /// manager keeps reconnecting regardless.
    pub fn auth_rejected(status: Option<u16>, reason: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("error".to_string(), Value::from("auth_rejected"));
        payload.insert("reason".to_string(), Value::from(reason));
        if let Some(status) = status {
            payload.insert("status".to_string(), Value::from(status));
        }
        Self::new(EventKind::ConfigUpdate, None, payload)
    }

    pub fn is_auth_rejection(&self) -> bool {
        self.kind == EventKind::ConfigUpdate
            && self.payload.get("error").and_then(Value::as_str) == Some("auth_rejected")
    }

    /// Convenience accessor for `payload.text`.
    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(Value::as_str)
    }
}
