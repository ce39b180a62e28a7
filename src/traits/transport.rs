//! Transport trait abstraction.
//!
//! The connection manager only ever talks to the network through these
//! traits, so the WebSocket implementation can be swapped for a scripted
//! mock in tests.

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection::ConnectRequest;
use crate::error::TransportError;

/// A unit of data read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Payload bytes (text or binary message)
    Data(Bytes),
    /// Transport-level ping/pong; proves liveness but carries no payload
    Heartbeat,
    /// Server closed the connection
    Close { code: u16, reason: String },
}

impl InboundFrame {
    pub fn text(text: impl Into<String>) -> Self {
        InboundFrame::Data(Bytes::from(text.into()))
    }
}

/// A unit of data to write to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

impl OutboundFrame {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutboundFrame::Text(text) => Some(text),
            OutboundFrame::Close { .. } => None,
        }
    }
}

/// Write half of an established connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError>;
}

/// Read half of an established connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound frame; `None` once the stream has ended.
    ///
    /// Must be cancel safe: the connection worker polls it inside `select!`.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>>;
}

/// Both halves of a connection returned by [`PullConnector::connect`].
pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Transport {
    pub fn new(sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) -> Self {
        Self { sink, source }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens connections to the pull server.
///
/// # Example
///
/// ```ignore
/// use pullwire::traits::PullConnector;
///
/// async fn open<C: PullConnector>(connector: &C, request: &ConnectRequest) {
///     match connector.connect(request).await {
///         Ok(transport) => { /* split halves between reader and writer */ }
///         Err(e) if e.is_auth_rejection() => { /* ask for fresh credentials */ }
///         Err(e) => { /* back off and retry */ }
///     }
/// }
/// ```
#[async_trait]
pub trait PullConnector: Send + Sync {
    /// Open a connection. Authentication happens as part of the handshake; a
    /// refused session is reported as [`TransportError::AuthRejected`].
    async fn connect(&self, request: &ConnectRequest) -> Result<Transport, TransportError>;
}
