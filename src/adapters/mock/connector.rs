//! Scripted connector for testing the connection manager without a network.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::connection::ConnectRequest;
use crate::error::TransportError;
use crate::traits::{FrameSink, FrameSource, InboundFrame, OutboundFrame, PullConnector, Transport};

enum Scripted {
    Fail(TransportError),
    Accept(Transport),
}

/// One call to [`PullConnector::connect`] as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub at: Instant,
    pub request: ConnectRequest,
}

/// Connector that plays back a script of connect outcomes.
///
/// Each `connect` call consumes the next scripted outcome; once the script is
/// exhausted every attempt fails with `ConnectionFailed`.
///
/// # Example
///
/// ```ignore
/// let connector = Arc::new(MockConnector::new());
/// connector.fail_next(TransportError::ConnectionFailed("refused".into()));
/// let mut server = connector.accept_next();
///
/// // ... start a manager with `connector.clone()` ...
/// let subscribe = server.next_text().await.unwrap();
/// server.send_text(r#"{"method":"push","params":{"text":"hi"}}"#);
/// ```
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<Scripted>>,
    attempts: Mutex<Vec<RecordedAttempt>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next attempt to fail with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(error));
    }

    /// Script the next attempt to succeed and return the server end of it.
    pub fn accept_next(&self) -> MockServer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let transport = Transport::new(
            Box::new(MockSink(sent_tx)),
            Box::new(MockSource(inbound_rx)),
        );
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Accept(transport));
        MockServer {
            inbound: inbound_tx,
            sent: sent_rx,
        }
    }

    pub fn attempts(&self) -> Vec<RecordedAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl PullConnector for MockConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Transport, TransportError> {
        self.attempts.lock().unwrap().push(RecordedAttempt {
            at: Instant::now(),
            request: request.clone(),
        });

        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Accept(transport)) => Ok(transport),
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(TransportError::ConnectionFailed(
                "no scripted connection".to_string(),
            )),
        }
    }
}

/// Server end of an accepted mock connection.
///
/// Dropping it ends the client's read stream, as if the peer hung up.
pub struct MockServer {
    inbound: mpsc::UnboundedSender<Result<InboundFrame, TransportError>>,
    sent: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl MockServer {
    /// Deliver a text frame to the client. Returns false once the client
    /// dropped the connection.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(InboundFrame::text(text))
    }

    pub fn send_bytes(&self, bytes: impl Into<Bytes>) -> bool {
        self.send_frame(InboundFrame::Data(bytes.into()))
    }

    pub fn send_frame(&self, frame: InboundFrame) -> bool {
        self.inbound.send(Ok(frame)).is_ok()
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.send_frame(InboundFrame::Close {
            code,
            reason: reason.to_string(),
        })
    }

    /// Make the client's next read fail.
    pub fn fail(&self, error: TransportError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }

    /// Next frame written by the client; `None` once the client's writer is gone.
    pub async fn next_sent(&mut self) -> Option<OutboundFrame> {
        self.sent.recv().await
    }

    /// Next text frame written by the client, skipping close frames.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            if let OutboundFrame::Text(text) = self.sent.recv().await? {
                return Some(text);
            }
        }
    }

    /// Everything the client has written so far.
    pub fn drain_sent(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

struct MockSink(mpsc::UnboundedSender<OutboundFrame>);

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.0
            .send(frame)
            .map_err(|_| TransportError::SendFailed("mock server dropped".to_string()))
    }
}

struct MockSource(mpsc::UnboundedReceiver<Result<InboundFrame, TransportError>>);

#[async_trait]
impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        self.0.recv().await
    }
}
