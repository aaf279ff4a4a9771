//! Gateway Integration Tests
//!
//! Drive the client against the in-process mock gateway. No external
//! services are needed.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use integration_tests::fixtures::*;
use integration_tests::{init_test_tracing, wait_for_event, MockGateway, MockSocket, TEST_TIMEOUT};
use nyx_gateway::protocol::UpdatePresence;
use nyx_gateway::rest::{ConnectionMetadata, MetadataError, SessionStartLimit};
use nyx_gateway::{
    CompressionType, ConnectionState, Gateway, GatewayError, GatewayEvent, GatewayOptions,
    MetadataProvider, OpCode, ReconnectPolicy, ShardMode, StaticMetadataProvider,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

type Events = mpsc::UnboundedReceiver<GatewayEvent>;

async fn start(options: GatewayOptions, mock: &MockGateway, shards: u32) -> (Arc<Gateway>, Events) {
    init_test_tracing();
    let provider = StaticMetadataProvider::new(mock.url(), shards, 1);
    let (gateway, events) = Gateway::new(options, Arc::new(provider)).expect("valid options");
    let gateway = Arc::new(gateway);
    gateway.connect().await.expect("connect");
    (gateway, events)
}

/// Accept a socket and walk it through Hello, Identify and READY
async fn establish(mock: &mut MockGateway, session_id: &str, sequence: u64) -> MockSocket {
    let mut socket = mock.accept().await.unwrap();
    socket.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    socket.recv_op(2).await.unwrap();
    socket
        .send_json(&ready(session_id, sequence, &mock.resume_url()))
        .await
        .unwrap();
    socket
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_identify_and_ready() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = mock.accept().await.unwrap();
    assert_eq!(socket.path, "/");
    assert_eq!(socket.query, "v=10&encoding=json");

    socket.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    let identify = socket.recv_op(2).await.unwrap();
    assert_eq!(identify["d"]["token"], TEST_TOKEN);
    assert_eq!(identify["d"]["shard"], json!([0, 1]));
    assert_eq!(identify["d"]["intents"], 513);
    assert_eq!(identify["d"]["large_threshold"], 50);

    socket
        .send_json(&ready("abc", 1, &mock.resume_url()))
        .await
        .unwrap();

    let started = wait_for_event(&mut events, |e| matches!(e, GatewayEvent::SessionStart { .. }))
        .await
        .unwrap();
    assert_eq!(
        started,
        GatewayEvent::SessionStart {
            shard_id: 0,
            session_id: "abc".to_string()
        }
    );
    wait_for_event(&mut events, |e| *e == GatewayEvent::Ready { shard_count: 1 })
        .await
        .unwrap();

    let status = gateway.shard_status(0).unwrap();
    assert_eq!(status.state, ConnectionState::Ready);
    assert_eq!(status.session_id.as_deref(), Some("abc"));
    assert_eq!(status.sequence, Some(1));
    assert!(gateway.is_healthy());

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_ready_waits_for_every_shard() {
    let mut mock = MockGateway::start().await.unwrap();
    let mut options = test_options();
    options.shard_mode = ShardMode::Fixed {
        ids: vec![0, 1],
        total: 2,
    };
    let (gateway, mut events) = start(options, &mock, 2).await;

    let mut shards = Vec::new();
    for _ in 0..2 {
        let mut socket = mock.accept().await.unwrap();
        socket.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
        let identify = socket.recv_op(2).await.unwrap();
        shards.push(identify["d"]["shard"].clone());
        socket
            .send_json(&ready("abc", 1, &mock.resume_url()))
            .await
            .unwrap();
    }
    shards.sort_by_key(|s| s[0].as_u64());
    assert_eq!(shards, vec![json!([0, 2]), json!([1, 2])]);

    wait_for_event(&mut events, |e| *e == GatewayEvent::Ready { shard_count: 2 })
        .await
        .unwrap();
    assert_eq!(gateway.shard_count(), 2);

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_shared_bucket_identifies_one_at_a_time() {
    let mut mock = MockGateway::start().await.unwrap();
    let mut options = test_options();
    options.shard_mode = ShardMode::Auto;
    options.identify_delay = Duration::from_millis(250);
    let (gateway, _events) = start(options, &mock, 4).await;
    assert_eq!(gateway.shard_count(), 4);

    let mut pending = Vec::new();
    for _ in 0..4 {
        let mut socket = mock.accept().await.unwrap();
        pending.push(tokio::spawn(async move {
            socket.send_json(&hello(SLOW_HEARTBEAT_MS)).await?;
            let identify = socket.recv_op(2).await?;
            anyhow::Ok((Instant::now(), identify["d"]["shard"].clone(), socket))
        }));
    }

    let mut identified = Vec::new();
    for task in pending {
        identified.push(task.await.unwrap().unwrap());
    }
    identified.sort_by_key(|(at, _, _)| *at);

    for pair in identified.windows(2) {
        let gap = pair[1].0 - pair[0].0;
        assert!(gap >= Duration::from_millis(200), "identifies only {gap:?} apart");
    }

    let mut shards: Vec<_> = identified.iter().map(|(_, shard, _)| shard.clone()).collect();
    shards.sort_by_key(|s| s[0].as_u64());
    assert_eq!(
        shards,
        vec![json!([0, 4]), json!([1, 4]), json!([2, 4]), json!([3, 4])]
    );

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_zlib_stream_transport() {
    let mut mock = MockGateway::start().await.unwrap();
    let mut options = test_options();
    options.compression = Some(CompressionType::ZlibStream);
    let (gateway, mut events) = start(options, &mock, 1).await;

    let mut socket = mock.accept().await.unwrap();
    assert_eq!(socket.query, "v=10&encoding=json&compress=zlib-stream");
    socket.enable_zlib();

    socket.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    socket.recv_op(2).await.unwrap();
    socket
        .send_json(&ready("abc", 1, &mock.resume_url()))
        .await
        .unwrap();
    socket
        .send_json(&dispatch("MESSAGE_CREATE", 2, json!({"content": "hi"})))
        .await
        .unwrap();

    let event = wait_for_event(&mut events, |e| {
        matches!(e, GatewayEvent::Dispatch { event, .. } if event == "MESSAGE_CREATE")
    })
    .await
    .unwrap();
    match event {
        GatewayEvent::Dispatch { sequence, data, .. } => {
            assert_eq!(sequence, Some(2));
            assert_eq!(data["content"], "hi");
        }
        other => panic!("unexpected event {other:?}"),
    }

    gateway.destroy(1000).await;
}

// ============================================================================
// Heartbeat Tests
// ============================================================================

#[tokio::test]
async fn test_server_heartbeat_request_is_answered_with_sequence() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = establish(&mut mock, "abc", 5).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();

    socket.send_json(&heartbeat_request()).await.unwrap();
    // A jittered first beat may still carry no sequence.
    let mut beat = socket.recv_op(1).await.unwrap();
    if beat["d"].is_null() {
        beat = socket.recv_op(1).await.unwrap();
    }
    assert_eq!(beat["d"], 5);

    wait_for_event(&mut events, |e| {
        matches!(e, GatewayEvent::HeartbeatSent { sequence: Some(5), .. })
    })
    .await
    .unwrap();

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_unacknowledged_heartbeats_trigger_resume() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = mock.accept().await.unwrap();
    socket.send_json(&hello(1000)).await.unwrap();
    socket.recv_op(2).await.unwrap();
    socket
        .send_json(&ready("abc", 9, &mock.resume_url()))
        .await
        .unwrap();

    let timeout = wait_for_event(&mut events, |e| {
        matches!(e, GatewayEvent::HeartbeatTimeout { .. })
    })
    .await
    .unwrap();
    assert_eq!(
        timeout,
        GatewayEvent::HeartbeatTimeout {
            shard_id: 0,
            missed: 2
        }
    );
    assert_eq!(socket.recv_close().await.unwrap(), Some(4900));

    let mut next = mock.accept().await.unwrap();
    assert_eq!(next.path, "/resume");
    next.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    let resume = next.recv_op(6).await.unwrap();
    assert_eq!(resume["d"]["session_id"], "abc");
    assert_eq!(resume["d"]["seq"], 9);

    gateway.destroy(1000).await;
}

// ============================================================================
// Resume / Reconnect Tests
// ============================================================================

#[tokio::test]
async fn test_resumable_close_resumes_on_resume_url() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = establish(&mut mock, "abc", 42).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();
    socket.close(4000).await.unwrap();

    let mut resumed_socket = mock.accept().await.unwrap();
    assert_eq!(resumed_socket.path, "/resume");
    resumed_socket.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();

    let resume = resumed_socket.recv_op(6).await.unwrap();
    assert_eq!(resume["d"]["token"], TEST_TOKEN);
    assert_eq!(resume["d"]["session_id"], "abc");
    assert_eq!(resume["d"]["seq"], 42);

    resumed_socket.send_json(&resumed(43)).await.unwrap();
    let event = wait_for_event(&mut events, |e| {
        matches!(e, GatewayEvent::SessionResumed { .. })
    })
    .await
    .unwrap();
    assert_eq!(
        event,
        GatewayEvent::SessionResumed {
            shard_id: 0,
            session_id: "abc".to_string()
        }
    );
    assert_eq!(gateway.shard_status(0).unwrap().sequence, Some(43));

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_session_invalidating_close_identifies_again() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = establish(&mut mock, "abc", 42).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();
    socket.close(4004).await.unwrap();

    wait_for_event(&mut events, |e| {
        matches!(e, GatewayEvent::SessionEnd { session_id: Some(id), .. } if id == "abc")
    })
    .await
    .unwrap();

    let mut fresh = mock.accept().await.unwrap();
    assert_eq!(fresh.path, "/");
    fresh.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    let identify = fresh.recv_op(2).await.unwrap();
    assert_eq!(identify["d"]["token"], TEST_TOKEN);

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_resumable_invalid_session_resumes() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = establish(&mut mock, "abc", 7).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();
    socket.send_json(&invalid_session(true)).await.unwrap();
    assert_eq!(socket.recv_close().await.unwrap(), Some(4900));

    let mut next = mock.accept().await.unwrap();
    assert_eq!(next.path, "/resume");
    next.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    let resume = next.recv_op(6).await.unwrap();
    assert_eq!(resume["d"]["seq"], 7);

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_reconnect_request_starts_new_session() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = establish(&mut mock, "abc", 3).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();
    socket.send_json(&reconnect()).await.unwrap();
    assert_eq!(socket.recv_close().await.unwrap(), Some(1000));

    let mut next = mock.accept().await.unwrap();
    assert_eq!(next.path, "/");
    next.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    next.recv_op(2).await.unwrap();

    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReconnect { .. }))
        .await
        .unwrap();

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_undecodable_frame_resumes() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = establish(&mut mock, "abc", 11).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();
    socket.send_text("not json").await.unwrap();

    wait_for_event(&mut events, |e| {
        matches!(e, GatewayEvent::Warn { message, .. } if message.starts_with("inbound frame rejected"))
    })
    .await
    .unwrap();
    assert_eq!(socket.recv_close().await.unwrap(), Some(4900));

    let mut next = mock.accept().await.unwrap();
    assert_eq!(next.path, "/resume");
    next.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    let resume = next.recv_op(6).await.unwrap();
    assert_eq!(resume["d"]["seq"], 11);

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_reconnect_attempts_are_bounded() {
    let mut mock = MockGateway::start().await.unwrap();
    let mut options = test_options();
    options.reconnect = ReconnectPolicy::new(vec![Duration::from_millis(10)], 3);
    let (gateway, mut events) = start(options, &mock, 1).await;

    for _ in 0..4 {
        let mut socket = mock.accept().await.unwrap();
        socket.close(4000).await.unwrap();
    }

    let err = tokio::time::timeout(TEST_TIMEOUT, gateway.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::MaxReconnectAttempts {
            shard_id: 0,
            attempts: 3
        }
    ));
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::Error { .. }))
        .await
        .unwrap();

    gateway.destroy(1000).await;
}

/// Serves metadata once, then never answers
struct StallingProvider {
    url: String,
    calls: AtomicUsize,
}

#[async_trait]
impl MetadataProvider for StallingProvider {
    async fn connection_metadata(&self) -> Result<ConnectionMetadata, MetadataError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            std::future::pending::<()>().await;
        }
        Ok(ConnectionMetadata {
            url: self.url.clone(),
            shards: 1,
            session_start_limit: SessionStartLimit::default(),
        })
    }

    async fn resource_count(&self) -> Result<u64, MetadataError> {
        Ok(0)
    }
}

#[tokio::test]
async fn test_destroy_interrupts_stalled_metadata_lookup() {
    init_test_tracing();
    let mut mock = MockGateway::start().await.unwrap();
    let provider = Arc::new(StallingProvider {
        url: mock.url(),
        calls: AtomicUsize::new(0),
    });
    let (gateway, mut events) =
        Gateway::new(test_options(), Arc::clone(&provider) as Arc<dyn MetadataProvider>)
            .expect("valid options");
    gateway.connect().await.expect("connect");

    let mut socket = establish(&mut mock, "abc", 1).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();
    socket.close(4004).await.unwrap();

    tokio::time::timeout(TEST_TIMEOUT, async {
        while provider.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("shard never refreshed its connect URL");

    tokio::time::timeout(TEST_TIMEOUT, gateway.destroy(1000))
        .await
        .expect("destroy hung on the metadata lookup");
    assert_eq!(gateway.shard_count(), 0);
}

// ============================================================================
// Fatal Close / Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_fatal_close_stops_shard() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = mock.accept().await.unwrap();
    socket.send_json(&hello(SLOW_HEARTBEAT_MS)).await.unwrap();
    socket.recv_op(2).await.unwrap();
    socket.close(4014).await.unwrap();

    let err = gateway.wait().await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::FatalClose {
            shard_id: 0,
            code: 4014,
            ..
        }
    ));
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::Error { .. }))
        .await
        .unwrap();

    let err = gateway
        .update_presence(&UpdatePresence::status("idle"))
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotConnected(0)));

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_presence_update_reaches_socket() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = establish(&mut mock, "abc", 1).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();

    gateway
        .update_presence(&UpdatePresence::status("dnd"))
        .unwrap();
    let presence = socket.recv_op(3).await.unwrap();
    assert_eq!(presence["d"]["status"], "dnd");

    let err = gateway
        .send(0, OpCode::Resume, &json!({}))
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotSendable(OpCode::Resume)));

    gateway.destroy(1000).await;
}

#[tokio::test]
async fn test_destroy_closes_with_code() {
    let mut mock = MockGateway::start().await.unwrap();
    let (gateway, mut events) = start(test_options(), &mock, 1).await;

    let mut socket = establish(&mut mock, "abc", 1).await;
    wait_for_event(&mut events, |e| matches!(e, GatewayEvent::ShardReady { .. }))
        .await
        .unwrap();

    gateway.destroy(4321).await;
    assert_eq!(socket.recv_close().await.unwrap(), Some(4321));

    wait_for_event(&mut events, |e| {
        matches!(e, GatewayEvent::SessionEnd { session_id: Some(id), .. } if id == "abc")
    })
    .await
    .unwrap();
    assert_eq!(gateway.shard_count(), 0);

    // A second destroy is a no-op.
    gateway.destroy(1000).await;
}
