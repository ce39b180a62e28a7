//! Transport-level failures.
//!
//! Every variant is recoverable from the connection manager's point of view:
//! the current epoch ends and a reconnect is scheduled. Authentication
//! rejections are additionally surfaced to the consumer once.

use thiserror::Error;

use crate::protocol::close_code;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// TCP connect or WebSocket handshake failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connect attempt did not finish in time.
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// Server refused the session during the handshake.
    #[error("Authentication rejected (HTTP {status})")]
    AuthRejected { status: u16 },

    /// Server closed the socket.
    #[error("Closed by server: {code} {reason}")]
    Closed { code: u16, reason: String },

    /// Writing a frame failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The URL or headers could not be turned into a request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the server refused our credentials rather than the network failing.
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            TransportError::AuthRejected { .. } => true,
            TransportError::Closed { code, .. } => *code == close_code::WRONG_CHANNEL_ID,
            _ => false,
        }
    }

    /// HTTP-ish status attached to an authentication rejection.
    pub fn auth_status(&self) -> Option<u16> {
        match self {
            TransportError::AuthRejected { status } => Some(*status),
            TransportError::Closed { code, .. } if *code == close_code::WRONG_CHANNEL_ID => {
                Some(*code)
            }
            _ => None,
        }
    }
}
