//! Connection manager behaviour against a scripted in-memory transport.
//!
//! Every test runs with paused tokio time, so backoff and keep-alive delays
//! are asserted exactly.

mod common;

use std::time::Duration;

use common::*;
use pullwire::config::PullConfig;
use pullwire::error::TransportError;
use pullwire::models::{ConnectionState, EventKind};
use pullwire::traits::OutboundFrame;
use serde_json::json;
use tokio::time::Instant;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[tokio::test(start_paused = true)]
async fn test_push_frame_reaches_consumer_as_message() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();

    bring_online(&mut client, &mut server).await;
    server.send_text(push_frame("133", "hi"));

    let event = client.next_event().await;
    assert_eq!(event.kind, EventKind::Message);
    assert_eq!(event.channel_id.as_deref(), Some("133"));
    assert_eq!(event.text(), Some("hi"));
    assert!(client.events.try_recv().is_none());

    let attempt = &client.connector.attempts()[0];
    assert_eq!(attempt.request.query_param("CHANNEL_ID").as_deref(), Some("abc/def"));
    assert_eq!(attempt.request.header("Cookie"), Some("PHPSESSID=session-1"));
    assert_eq!(attempt.request.header("Origin"), Some("https://portal.test"));
}

#[tokio::test(start_paused = true)]
async fn test_state_sequence_and_status_notifications() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    let statuses = client.drain_statuses();
    let states: Vec<_> = statuses.iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Authenticating,
            ConnectionState::Subscribing,
            ConnectionState::Online,
        ]
    );
    assert!(statuses.last().unwrap().connected);
    assert!(statuses[..3].iter().all(|s| !s.connected));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_before_fourth_attempt_succeeds() {
    let mut client = TestClient::new(PullConfig::default());
    for _ in 0..3 {
        client
            .connector
            .fail_next(TransportError::ConnectionFailed("refused".to_string()));
    }
    let mut server = client.connector.accept_next();
    client.start();

    client.wait_for(ConnectionState::Subscribing).await;
    let attempts = client.connector.attempts();
    assert_eq!(attempts.len(), 4);
    let gaps: Vec<_> = attempts.windows(2).map(|w| w[1].at - w[0].at).collect();
    assert_eq!(gaps, vec![secs(1), secs(2), secs(4)]);
    assert_eq!(client.manager.debug_info().reconnect_attempt, 3);

    bring_online(&mut client, &mut server).await;
    assert_eq!(client.manager.debug_info().reconnect_attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_online() {
    let mut client = TestClient::new(PullConfig::default());
    client
        .connector
        .fail_next(TransportError::ConnectionFailed("refused".to_string()));
    let mut first = client.connector.accept_next();
    client
        .connector
        .fail_next(TransportError::ConnectionFailed("refused".to_string()));
    let _second = client.connector.accept_next();
    client.start();

    bring_online(&mut client, &mut first).await;
    drop(first);
    client.wait_for(ConnectionState::Reconnecting).await;
    client.wait_for(ConnectionState::Subscribing).await;

    let at: Vec<_> = client.connector.attempts().iter().map(|a| a.at).collect();
    assert_eq!(at.len(), 4);
    assert_eq!(at[1] - at[0], secs(1));
    // Counting starts over after the connection was online
    assert_eq!(at[2] - at[1], secs(1));
    assert_eq!(at[3] - at[2], secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_capped_at_ceiling() {
    let config = PullConfig::default().with_backoff_max(secs(8));
    let mut client = TestClient::new(config);
    for _ in 0..6 {
        client
            .connector
            .fail_next(TransportError::Tls("handshake".to_string()));
    }
    let _server = client.connector.accept_next();
    client.start();

    client.wait_for(ConnectionState::Subscribing).await;
    let attempts = client.connector.attempts();
    let gaps: Vec<_> = attempts.windows(2).map(|w| w[1].at - w[0].at).collect();
    assert_eq!(
        gaps,
        vec![secs(1), secs(2), secs(4), secs(8), secs(8), secs(8)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_max_reconnect_attempts_closes_client() {
    let config = PullConfig::default().with_max_reconnect_attempts(Some(2));
    let mut client = TestClient::new(config);
    client.start();

    client.wait_for(ConnectionState::Closed).await;
    assert_eq!(client.connector.attempt_count(), 3);

    let closed = client.drain_statuses().pop().unwrap();
    assert_eq!(closed.state, ConnectionState::Closed);
    assert_eq!(closed.reason, "max reconnect attempts reached");
    assert!(client.events.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_timeout_reconnects_exactly_once() {
    let mut client = TestClient::new(PullConfig::default());
    let mut first = client.connector.accept_next();
    let _second = client.connector.accept_next();
    client.start();

    bring_online(&mut client, &mut first).await;
    let online_at = Instant::now();

    // A quiet connection is pinged early before the deadline runs out
    let ping = parse(&first.next_text().await.unwrap());
    assert_eq!(ping["method"], "ping");
    assert_eq!(online_at.elapsed(), secs(10));

    client.wait_for(ConnectionState::Reconnecting).await;
    assert_eq!(online_at.elapsed(), secs(20));

    let (_, close) = frames_until_close(&mut first).await;
    assert_eq!(close, Some(3005));

    client.wait_for(ConnectionState::Subscribing).await;
    assert_eq!(online_at.elapsed(), secs(21));

    let reconnects: Vec<_> = client
        .drain_statuses()
        .into_iter()
        .filter(|s| s.state == ConnectionState::Reconnecting)
        .collect();
    assert_eq!(reconnects.len(), 1);
    assert_eq!(reconnects[0].reason, "keep-alive timeout");
    assert_eq!(client.connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_deadline_follows_last_traffic() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    let _next = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;
    let online_at = Instant::now();

    tokio::time::sleep(secs(15)).await;
    server.send_text(push_frame("133", "late"));
    assert_eq!(client.next_event().await.text(), Some("late"));

    client.wait_for(ConnectionState::Reconnecting).await;
    assert_eq!(online_at.elapsed(), secs(35));
}

#[tokio::test(start_paused = true)]
async fn test_traffic_keeps_connection_alive() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    for _ in 0..5 {
        let ping = parse(&server.next_text().await.unwrap());
        assert_eq!(ping["method"], "ping");
        tokio::time::sleep(secs(3)).await;
        server.send_text(json!({"jsonrpc": "2.0", "result": "pong", "id": ping["id"]}).to_string());
    }

    assert_eq!(client.manager.state(), ConnectionState::Online);
    assert_eq!(client.connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_without_response_times_out() {
    let mut client = TestClient::new(PullConfig::default());
    let mut silent = client.connector.accept_next();
    client.start();

    client.wait_for(ConnectionState::Subscribing).await;
    let subscribing_at = Instant::now();
    client.wait_for(ConnectionState::Reconnecting).await;
    assert_eq!(subscribing_at.elapsed(), secs(20));

    let (texts, close) = frames_until_close(&mut silent).await;
    assert_eq!(parse(&texts[0]), expected_subscribe());
    assert_eq!(close, Some(3005));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_do_not_stop_receive_loop() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    server.send_text(r#"{"method":"push","params":{"gro"#);
    let mut truncated = 500u32.to_be_bytes().to_vec();
    truncated.extend_from_slice(br#"{"method":"push"}"#);
    server.send_bytes(truncated);
    server.send_text(push_frame("133", "still here"));

    let event = client.next_event().await;
    assert_eq!(event.text(), Some("still here"));
    assert_eq!(client.manager.state(), ConnectionState::Online);
    assert_eq!(client.connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_keep_per_channel_order() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    for seq in 0..60 {
        let channel = ["1", "2", "3"][seq as usize % 3];
        server.send_text(sequenced_push(channel, seq));
    }

    let mut last_seen = std::collections::HashMap::new();
    for _ in 0..60 {
        let event = client.next_event().await;
        let channel = event.channel_id.clone().unwrap();
        let seq = event.payload["seq"].as_u64().unwrap();
        if let Some(previous) = last_seen.insert(channel, seq) {
            assert!(seq > previous, "out of order: {} after {}", seq, previous);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_resubscribes_identically_after_reconnect() {
    let mut client = TestClient::new(PullConfig::default());
    let mut first = client.connector.accept_next();
    let mut second = client.connector.accept_next();
    client.manager.watch_user_status(7);
    client.start();

    let first_subscribe = first.next_text().await.unwrap();
    let first_status = first.next_text().await.unwrap();
    first.send_text(push_frame("1", "x"));
    client.wait_for(ConnectionState::Online).await;
    drop(first);

    let second_subscribe = second.next_text().await.unwrap();
    let second_status = second.next_text().await.unwrap();

    assert_eq!(first_subscribe, second_subscribe);
    assert_eq!(parse(&first_subscribe), expected_subscribe());
    assert_eq!(parse(&first_status)["method"], "subscribeStatusChange");
    assert_eq!(parse(&second_status)["params"]["userId"], 7);
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_surfaced_once_per_streak() {
    let mut client = TestClient::new(PullConfig::default());
    for _ in 0..3 {
        client
            .connector
            .fail_next(TransportError::AuthRejected { status: 401 });
    }
    let mut server = client.connector.accept_next();
    client.start();

    client.wait_for(ConnectionState::Subscribing).await;
    let rejection = client.next_event().await;
    assert!(rejection.is_auth_rejection());
    assert_eq!(rejection.kind, EventKind::ConfigUpdate);
    assert_eq!(rejection.payload["status"], 401);
    assert!(client.events.try_recv().is_none());

    // Every attempt after a rejection asks for fresh credentials
    assert_eq!(client.credentials.refresh_count(), 3);

    bring_online(&mut client, &mut server).await;
}

#[tokio::test(start_paused = true)]
async fn test_wrong_channel_close_is_auth_rejection() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    let _next = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    server.close(4010, "wrong channel id");
    let event = client.next_event().await;
    assert!(event.is_auth_rejection());
    assert_eq!(event.payload["status"], 4010);

    client.wait_for(ConnectionState::Subscribing).await;
    assert_eq!(client.credentials.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_restart_close_waits_fixed_delay() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    let _next = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    let closed_at = Instant::now();
    server.close(3002, "server restarted");
    client.wait_for(ConnectionState::Reconnecting).await;
    client.wait_for(ConnectionState::Subscribing).await;
    assert_eq!(closed_at.elapsed(), secs(15));
    assert_eq!(client.credentials.refresh_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_channel_expire_command_refreshes_and_reconnects() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    let _next = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    let sent_at = Instant::now();
    server.send_text(pull_command("channel_expire"));

    let event = client.next_event().await;
    assert_eq!(event.kind, EventKind::ConfigUpdate);

    let (_, close) = frames_until_close(&mut server).await;
    assert_eq!(close, Some(1000));

    client.wait_for(ConnectionState::Subscribing).await;
    assert_eq!(sent_at.elapsed(), secs(1));
    assert_eq!(client.credentials.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_pings_are_answered() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    server.send_text("ping");
    assert_eq!(server.next_text().await.as_deref(), Some("pong"));
    assert_eq!(client.next_event().await.kind, EventKind::Ping);

    server.send_text(r#"{"jsonrpc":"2.0","method":"ping","id":5}"#);
    assert_eq!(
        parse(&server.next_text().await.unwrap()),
        json!({"jsonrpc": "2.0", "result": "pong", "id": 5})
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_messages_acked_but_dispatched_once() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    let frame = json!({
        "method": "message",
        "params": {"mid": "m1", "body": {"module_id": "im", "command": "message", "params": {"chat_id": 9}}}
    })
    .to_string();
    server.send_text(frame.clone());
    server.send_text(frame);
    server.send_text(push_frame("9", "after"));

    let first = client.next_event().await;
    assert_eq!(first.kind, EventKind::Message);
    assert_eq!(first.channel_id.as_deref(), Some("9"));
    assert_eq!(client.next_event().await.text(), Some("after"));

    let ack = parse(&server.next_text().await.unwrap());
    assert_eq!(ack["method"], "ack");
    assert_eq!(ack["params"]["mid"], "m1");
    assert_eq!(parse(&server.next_text().await.unwrap())["method"], "ack");
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect() {
    let mut client = TestClient::new(PullConfig::default());
    let mut first = client.connector.accept_next();
    let _second = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut first).await;

    let requested_at = Instant::now();
    assert!(client.manager.force_reconnect());

    let (_, close) = frames_until_close(&mut first).await;
    assert_eq!(close, Some(1000));
    client.wait_for(ConnectionState::Subscribing).await;
    assert_eq!(requested_at.elapsed(), secs(1));
    assert_eq!(client.manager.debug_info().epoch, 2);
}

#[tokio::test(start_paused = true)]
async fn test_watch_user_status_while_online() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    client.manager.watch_user_status(12);
    let request = parse(&server.next_text().await.unwrap());
    assert_eq!(request["method"], "subscribeStatusChange");
    assert_eq!(request["params"]["userId"], 12);

    client.manager.unwatch_user_status(12);
    let request = parse(&server.next_text().await.unwrap());
    assert_eq!(request["method"], "unsubscribeStatusChange");
}

#[tokio::test(start_paused = true)]
async fn test_send_typing_while_online() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();

    assert!(!client.manager.send_typing(9, true));
    bring_online(&mut client, &mut server).await;

    assert!(client.manager.send_typing(9, true));
    let request = parse(&server.next_text().await.unwrap());
    assert_eq!(request["method"], "publish");
    assert_eq!(request["params"]["channelList"], json!(["9"]));
    assert_eq!(
        request["params"]["body"],
        json!({"module_id": "im", "command": "typing", "params": {"chat_id": 9, "typing": true}})
    );
    assert_eq!(request["id"], client.manager.debug_info().rpc_id);
}

#[tokio::test(start_paused = true)]
async fn test_revision_changed_updates_debug_info() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;
    assert_eq!(client.manager.debug_info().revision, 19);

    server.send_text(
        json!({
            "method": "message",
            "params": {"body": {"module_id": "pull", "command": "revision_changed", "params": {"revision": 21}}}
        })
        .to_string(),
    );

    let event = client.next_event().await;
    assert_eq!(event.kind, EventKind::ConfigUpdate);
    assert_eq!(client.manager.debug_info().revision, 21);

    // Not a reconnect trigger
    tokio::time::sleep(secs(5)).await;
    assert_eq!(client.manager.state(), ConnectionState::Online);
    assert_eq!(client.manager.debug_info().epoch, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_async_closes_socket_with_manual_code() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    client.manager.stop_async().await;
    assert_eq!(client.manager.state(), ConnectionState::Closed);

    let (_, close) = frames_until_close(&mut server).await;
    assert_eq!(close, Some(3004));
    assert!(client.events.recv().await.is_none());

    // Idempotent
    client.manager.stop_async().await;
    client.manager.stop();
    assert_eq!(client.manager.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff() {
    let mut client = TestClient::new(PullConfig::default());
    client.start();
    client.wait_for(ConnectionState::Reconnecting).await;

    client.manager.stop_async().await;
    assert_eq!(client.manager.state(), ConnectionState::Closed);
    assert_eq!(client.connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_credential_refresh_pending() {
    let mut client = TestClient::new(PullConfig::default());
    client.credentials.set_refresh_hangs(true);
    client
        .connector
        .fail_next(TransportError::AuthRejected { status: 401 });
    client.start();

    assert!(client.next_event().await.is_auth_rejection());
    client.wait_for(ConnectionState::Reconnecting).await;
    client.wait_for(ConnectionState::Connecting).await;
    tokio::time::sleep(secs(5)).await;
    assert_eq!(client.manager.state(), ConnectionState::Connecting);
    assert_eq!(client.credentials.refresh_count(), 1);

    tokio::time::timeout(secs(5), client.manager.stop_async())
        .await
        .expect("stop must not wait for the auth collaborator");
    assert_eq!(client.manager.state(), ConnectionState::Closed);
    assert_eq!(client.connector.attempt_count(), 1);
    assert!(client.events.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_close_frame_not_sent_after_peer_hangup() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.start();
    bring_online(&mut client, &mut server).await;

    server.fail(TransportError::ConnectionFailed("reset".to_string()));
    client.wait_for(ConnectionState::Reconnecting).await;
    let frames = server.drain_sent();
    assert!(frames
        .iter()
        .all(|frame| !matches!(frame, OutboundFrame::Close { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_credential_load_failure_still_connects() {
    let mut client = TestClient::new(PullConfig::default());
    client.credentials.set_load_should_fail(true);
    let mut server = client.connector.accept_next();
    client.start();

    bring_online(&mut client, &mut server).await;
    let attempt = &client.connector.attempts()[0];
    assert_eq!(attempt.request.header("Cookie"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_joins_worker_thread_promptly() {
    let mut client = TestClient::new(PullConfig::default());
    let mut server = client.connector.accept_next();
    client.manager.start(test_channels(), test_params());

    bring_online(&mut client, &mut server).await;

    let started = std::time::Instant::now();
    tokio::task::block_in_place(|| client.manager.stop());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.manager.state(), ConnectionState::Closed);

    let (_, close) = frames_until_close(&mut server).await;
    assert_eq!(close, Some(3004));
    assert!(client.events.recv().await.is_none());
}
