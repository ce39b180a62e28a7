use serde::{Deserialize, Serialize};

/// Lifecycle of a pull connection.
///
/// Owned by exactly one connection manager; transitions are the only mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Online,
    Reconnecting,
    /// Terminal
    Closed,
}

impl ConnectionState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionState::Online)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (*self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Authenticating) | (Connecting, Reconnecting) => true,
            (Authenticating, Subscribing) | (Authenticating, Reconnecting) => true,
            (Subscribing, Online) | (Subscribing, Reconnecting) => true,
            (Online, Reconnecting) => true,
            (Reconnecting, Connecting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Online => "online",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Notification published on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub reason: String,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState, reason: impl Into<String>) -> Self {
        Self {
            state,
            connected: state.is_online(),
            reason: reason.into(),
        }
    }
}
