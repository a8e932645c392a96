//! End-to-end connection handling over an in-memory socket

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracker_services::{
    AggregatorConfig, ChannelSocket, ClientId, ConnectionConfig, LastBroadcast, SnapshotAggregator,
    SocketPeer, SubscriberRegistry, SyntheticProvider, WebSocketState,
};

struct TestServer {
    registry: Arc<SubscriberRegistry>,
    aggregator: Arc<SnapshotAggregator>,
    state: WebSocketState,
}

fn server() -> TestServer {
    let aggregator = Arc::new(SnapshotAggregator::new(
        Arc::new(SyntheticProvider::with_seed(11)),
        AggregatorConfig::default(),
    ));
    let registry = Arc::new(SubscriberRegistry::new());
    let state = WebSocketState::new(
        Arc::clone(&registry),
        Arc::clone(&aggregator),
        LastBroadcast::default(),
        ConnectionConfig::default(),
    );
    TestServer {
        registry,
        aggregator,
        state,
    }
}

fn connect(server: &TestServer) -> (SocketPeer, JoinHandle<()>) {
    let (socket, peer) = ChannelSocket::pair(16);
    let state = server.state.clone();
    let handle = tokio::spawn(async move { state.handle_connection(socket).await });
    (peer, handle)
}

async fn next_json(peer: &mut SocketPeer) -> Value {
    match peer.outbound.recv().await {
        Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

async fn send_text(peer: &SocketPeer, text: &str) {
    peer.inbound.send(Message::text(text)).await.unwrap();
}

/// Consume `connection_established` and `initial_data`
async fn skip_greeting(peer: &mut SocketPeer) {
    assert_eq!(next_json(peer).await["type"], "connection_established");
    assert_eq!(next_json(peer).await["type"], "initial_data");
}

#[tokio::test]
async fn test_greeting_and_registration() {
    let server = server();
    let (mut peer, _handle) = connect(&server);

    let established = next_json(&mut peer).await;
    assert_eq!(established["type"], "connection_established");
    assert_eq!(established["client_id"], "client-1");
    assert_eq!(established["server_status"], "healthy");
    assert!(established["timestamp"].is_string());

    let initial = next_json(&mut peer).await;
    assert_eq!(initial["type"], "initial_data");
    assert_eq!(initial["client_id"], "client-1");
    assert_eq!(initial["data"]["prices"].as_array().unwrap().len(), 10);
    assert_eq!(initial["data"]["prices"][0]["symbol"], "BTC");
    assert_eq!(initial["data"]["prices"][0]["data_source"], "synthetic");

    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn test_control_messages() {
    let server = server();
    let (mut peer, _handle) = connect(&server);
    skip_greeting(&mut peer).await;

    send_text(&peer, r#"{"type":"ping"}"#).await;
    let pong = next_json(&mut peer).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["client_id"], "client-1");

    send_text(&peer, r#"{"type":"subscribe"}"#).await;
    let confirmed = next_json(&mut peer).await;
    assert_eq!(confirmed["type"], "subscription_confirmed");
    assert_eq!(confirmed["symbols"], serde_json::json!(["all"]));

    send_text(&peer, r#"{"type":"subscribe","symbols":["BTC","SOL"]}"#).await;
    let confirmed = next_json(&mut peer).await;
    assert_eq!(confirmed["symbols"], serde_json::json!(["BTC", "SOL"]));

    send_text(&peer, r#"{"type":"request_data"}"#).await;
    let update = next_json(&mut peer).await;
    assert_eq!(update["type"], "market_update");
    assert_eq!(update["requested"], true);
    assert_eq!(update["client_id"], "client-1");
    assert!(update["data"]["overview"]["trending_coins"].is_array());
}

#[tokio::test]
async fn test_malformed_and_unknown_messages() {
    let server = server();
    let (mut peer, _handle) = connect(&server);
    skip_greeting(&mut peer).await;

    send_text(&peer, "{definitely not json").await;
    let error = next_json(&mut peer).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "invalid_message");

    // Unknown types get no reply; the next frame answers the ping
    send_text(&peer, r#"{"type":"dance"}"#).await;
    send_text(&peer, r#"{"type":"ping"}"#).await;
    assert_eq!(next_json(&mut peer).await["type"], "pong");

    // Still connected after both
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_after_silence() {
    let server = server();
    let (mut peer, _handle) = connect(&server);
    skip_greeting(&mut peer).await;

    let start = tokio::time::Instant::now();
    let keepalive = next_json(&mut peer).await;
    assert_eq!(keepalive["type"], "keepalive");
    assert!(start.elapsed() >= std::time::Duration::from_secs(60));
}

#[tokio::test]
async fn test_broadcast_reaches_client() {
    let server = server();
    let (mut peer, _handle) = connect(&server);
    skip_greeting(&mut peer).await;

    let snapshot = server.aggregator.snapshot().await.unwrap();
    let report = server.registry.broadcast_snapshot(snapshot).await;
    assert_eq!(report.delivered, 1);

    let update = next_json(&mut peer).await;
    assert_eq!(update["type"], "market_update");
    assert_eq!(update["active_connections"], 1);
    assert!(update.get("requested").is_none());
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    let server = server();
    let (mut peer, handle) = connect(&server);
    skip_greeting(&mut peer).await;
    assert_eq!(server.registry.len(), 1);

    drop(peer.inbound);
    handle.await.unwrap();

    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_stalled_client_is_dropped() {
    let server = server();
    let (mut peer, _handle) = connect(&server);
    skip_greeting(&mut peer).await;

    // The peer stops reading: socket buffer, then the outgoing queue fill up
    let snapshot = server.aggregator.snapshot().await.unwrap();
    let mut dropped = Vec::new();
    for _ in 0..300 {
        let report = server.registry.broadcast_snapshot(snapshot.clone()).await;
        dropped.extend(report.dropped);
        tokio::task::yield_now().await;
    }

    assert_eq!(dropped, vec![ClientId(1)]);
    assert!(server.registry.is_empty());

    // Nothing beyond the bounded buffers was queued for the peer
    let mut buffered = 0;
    while peer.outbound.try_recv().is_ok() {
        buffered += 1;
    }
    assert!(buffered <= 16, "buffered {} frames", buffered);
}
