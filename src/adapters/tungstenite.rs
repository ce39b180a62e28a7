//! Tungstenite-based WebSocket adapter.
//!
//! Implements [`PullConnector`] over `tokio-tungstenite`: builds the client
//! request with the pull headers, performs the handshake and splits the
//! stream into a [`FrameSink`]/[`FrameSource`] pair.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::connection::ConnectRequest;
use crate::error::TransportError;
use crate::traits::{FrameSink, FrameSource, InboundFrame, OutboundFrame, PullConnector, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the server's close frame carries none.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Production connector.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PullConnector for TungsteniteConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Transport, TransportError> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            ws_request.headers_mut().insert(name, value);
        }

        let (stream, response) = connect_async(ws_request).await.map_err(map_error)?;
        info!("Pull WebSocket connected (HTTP {})", response.status());

        let (sink, source) = stream.split();
        Ok(Transport::new(
            Box::new(TungsteniteSink(sink)),
            Box::new(TungsteniteSource(source)),
        ))
    }
}

struct TungsteniteSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        let message = match frame {
            OutboundFrame::Text(text) => Message::Text(text),
            OutboundFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

struct TungsteniteSource(SplitStream<WsStream>);

#[async_trait]
impl FrameSource for TungsteniteSource {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let frame = match self.0.next().await? {
                Ok(Message::Text(text)) => InboundFrame::Data(Bytes::from(text)),
                Ok(Message::Binary(data)) => InboundFrame::Data(Bytes::from(data)),
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => InboundFrame::Heartbeat,
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                    InboundFrame::Close { code, reason }
                }
                Ok(Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    debug!("WebSocket already closed");
                    return None;
                }
                Err(e) => return Some(Err(map_error(e))),
            };
            return Some(Ok(frame));
        }
    }
}

fn map_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                TransportError::AuthRejected { status }
            } else {
                TransportError::ConnectionFailed(format!("HTTP {}", status))
            }
        }
        WsError::Tls(e) => TransportError::Tls(e.to_string()),
        WsError::Url(e) => TransportError::InvalidRequest(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed {
            code: NO_STATUS_RECEIVED,
            reason: "connection closed".to_string(),
        },
        WsError::Io(e) => TransportError::ConnectionFailed(e.to_string()),
        other => TransportError::Other(other.to_string()),
    }
}
