use thiserror::Error;

/// A frame that could not be turned into an [`Envelope`](crate::models::Envelope).
///
/// Decode errors are logged and the frame dropped; they never end the
/// receive loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    /// Length prefix announces more bytes than the frame carries.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Well-formed JSON that is not a JSON-RPC object.
    #[error("unexpected payload: {0}")]
    NotAnEnvelope(String),
}
