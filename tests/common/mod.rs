//! Common test utilities for integration tests.
//!
//! Builds a [`ConnectionManager`] wired to the scripted mock connector and
//! in-memory credentials, plus helpers for waiting on state and events.
//!
//! # Example
//!
//! ```ignore
//! let h = TestClient::new(PullConfig::default());
//! let mut server = h.connector.accept_next();
//! h.start();
//! assert_eq!(server.next_text().await.unwrap(), expected_subscribe());
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use pullwire::adapters::mock::{InMemoryCredentials, MockConnector, MockServer};
use pullwire::auth::SessionCredentials;
use pullwire::config::PullConfig;
use pullwire::connection::{ConnectionManager, ConnectionParams};
use pullwire::dispatch::EventStream;
use pullwire::models::{Channel, ConnectionState, ConnectionStatus, Event};
use pullwire::traits::OutboundFrame;

/// Generous bound for anything that should happen "soon" in paused time.
pub const SOON: Duration = Duration::from_secs(120);

pub fn test_channels() -> Vec<Channel> {
    vec![Channel::private("abc"), Channel::shared("def")]
}

pub fn test_params() -> ConnectionParams {
    ConnectionParams::new("ws://pull.test/subws/", "https://portal.test", 42, "s1")
        .with_hostname("test-host")
        .with_timestamp(1_700_000_000)
}

pub fn test_session() -> SessionCredentials {
    SessionCredentials::new().with_cookie("PHPSESSID", "session-1")
}

/// Subscribe request expected for [`test_channels`].
pub fn expected_subscribe() -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "subscribe",
        "params": {"channels": {"private": ["abc"], "shared": ["def"]}}
    })
}

pub fn push_frame(group_id: &str, text: &str) -> String {
    json!({"method": "push", "params": {"group_id": group_id, "text": text}}).to_string()
}

pub fn sequenced_push(group_id: &str, seq: u64) -> String {
    json!({"method": "push", "params": {"group_id": group_id, "seq": seq}}).to_string()
}

/// A `message` frame from the `pull` module carrying a control command.
pub fn pull_command(command: &str) -> String {
    json!({
        "method": "message",
        "params": {"body": {"module_id": "pull", "command": command, "params": {}}}
    })
    .to_string()
}

pub fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

/// Manager wired to mocks, not yet started.
pub struct TestClient {
    pub manager: ConnectionManager,
    pub connector: Arc<MockConnector>,
    pub credentials: Arc<InMemoryCredentials>,
    pub events: EventStream,
    pub statuses: mpsc::UnboundedReceiver<ConnectionStatus>,
    pub state: watch::Receiver<ConnectionState>,
}

impl TestClient {
    pub fn new(config: PullConfig) -> Self {
        let connector = Arc::new(MockConnector::new());
        let credentials = Arc::new(InMemoryCredentials::with_credentials(test_session()));
        let manager = ConnectionManager::new(connector.clone(), credentials.clone(), config);
        let events = manager.events().unwrap();
        let statuses = manager.status_stream().unwrap();
        let state = manager.state_receiver();
        Self {
            manager,
            connector,
            credentials,
            events,
            statuses,
            state,
        }
    }

    /// Start on the test's runtime so paused time drives every timer.
    pub fn start(&self) {
        self.manager.start_in_runtime(test_channels(), test_params());
    }

    pub async fn wait_for(&mut self, target: ConnectionState) {
        assert!(
            wait_for_state(&mut self.state, target, SOON).await,
            "state never reached {}, stuck at {}",
            target,
            *self.state.borrow()
        );
    }

    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(SOON, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    /// All status notifications published so far.
    pub fn drain_statuses(&mut self) -> Vec<ConnectionStatus> {
        let mut statuses = Vec::new();
        while let Ok(status) = self.statuses.try_recv() {
            statuses.push(status);
        }
        statuses
    }
}

/// Read the subscribe handshake (subscribe request + ping) from `server`,
/// answer it, and wait until the client is online.
pub async fn bring_online(client: &mut TestClient, server: &mut MockServer) {
    let subscribe = server.next_text().await.unwrap();
    assert_eq!(parse(&subscribe), expected_subscribe());
    let ping = parse(&server.next_text().await.unwrap());
    assert_eq!(ping["method"], "ping");

    server.send_text(json!({"jsonrpc": "2.0", "result": "pong", "id": ping["id"]}).to_string());
    client.wait_for(ConnectionState::Online).await;

    // The pong reply is delivered to the consumer as well
    let pong = client.next_event().await;
    assert_eq!(pong.payload["result"], "pong");
}

/// Frames written by the client until (and including) its close frame.
pub async fn frames_until_close(server: &mut MockServer) -> (Vec<String>, Option<u16>) {
    let mut texts = Vec::new();
    while let Some(frame) = server.next_sent().await {
        match frame {
            OutboundFrame::Text(text) => texts.push(text),
            OutboundFrame::Close { code, .. } => return (texts, Some(code)),
        }
    }
    (texts, None)
}

pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    target: ConnectionState,
    within: Duration,
) -> bool {
    let reached = tokio::time::timeout(within, async {
        loop {
            if *rx.borrow_and_update() == target {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    reached.is_ok() && *rx.borrow() == target
}
