//! Live Pipeline Integration Tests
//!
//! Drives frames through the ingestor and observes them on a real
//! subscriber WebSocket and through the range query endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use ticker_stream_server::{
    ApiServer, ApiState, BroadcastConfig, BroadcastHub, BufferConfig, CompressionCodec,
    InMemoryStore, PersistenceBuffer, PersistenceMode, QueryService, SymbolIdentityCache,
    TickIngestor, TickRecord,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME: &str = r#"[
    {"e":"24hrTicker","E":1705312800000,"s":"BTCUSDT","c":"42150.01","o":"41980.00","h":"42500.00","l":"41800.00","v":"18234.5","q":"768123456.78"},
    {"e":"24hrTicker","E":1705312800000,"s":"ETHUSDT","c":"2550.10","o":"2500.00","h":"2560.00","l":"2490.00","v":"99000","q":"250000000"}
]"#;

struct TestServer {
    addr: SocketAddr,
    hub: Arc<BroadcastHub>,
    ingestor: TickIngestor,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

async fn setup_test_server() -> TestServer {
    let store = Arc::new(InMemoryStore::new());
    let cache = Arc::new(SymbolIdentityCache::hydrate(store.clone()).await.unwrap());
    let buffer = Arc::new(PersistenceBuffer::new(store.clone(), BufferConfig::default()));
    let hub = Arc::new(BroadcastHub::new(BroadcastConfig::default()));
    let ingestor = TickIngestor::new(
        cache,
        buffer,
        Arc::clone(&hub),
        CompressionCodec::new(),
        PersistenceMode::Immediate,
    );
    let query = Arc::new(QueryService::new(store.clone(), store));

    let shutdown = CancellationToken::new();
    let state = ApiState::new(query, Arc::clone(&hub), shutdown.clone());
    let server = ApiServer::bind("127.0.0.1:0".parse().unwrap(), state)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        server.run().await.unwrap();
    });

    TestServer {
        addr,
        hub,
        ingestor,
        shutdown,
        handle,
    }
}

async fn subscribe(addr: SocketAddr, path: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .unwrap();
    ws
}

async fn wait_for_subscribers(hub: &BroadcastHub, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while hub.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count settles");
}

async fn next_binary(ws: &mut Client) -> Vec<u8> {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .unwrap();
        if let Message::Binary(data) = message {
            return data.to_vec();
        }
    }
}

#[tokio::test]
async fn subscriber_receives_batch_and_history_matches() {
    let server = setup_test_server().await;
    let mut ws = subscribe(server.addr, "/ws").await;
    wait_for_subscribers(&server.hub, 1).await;

    let report = server.ingestor.on_message(FRAME).await.unwrap();
    assert_eq!(report.records, 2);
    assert_eq!(report.receivers, 1);

    let data = next_binary(&mut ws).await;
    let batch: Vec<TickRecord> = CompressionCodec::new().decode(&data).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].trading_pair, "BTCUSDT");
    assert_eq!(batch[0].coin_id.value(), 1);
    assert_eq!(batch[1].trading_pair, "ETHUSDT");
    assert_eq!(batch[1].coin_id.value(), 2);

    let body: Value = reqwest::Client::new()
        .post(format!("http://{}/api/searchCoinData", server.addr))
        .json(&json!({
            "startDate": "2024-01-15T09:00:00Z",
            "endDate": "2024-01-15T10:00:00Z",
            "coinName": "BTCUSDT",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], 1);
    assert_eq!(body["errors"], json!([]));
    let history: Vec<TickRecord> = serde_json::from_value(body["data"].clone()).unwrap();
    assert_eq!(history, vec![batch[0].clone()]);

    server.shutdown.cancel();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn every_subscriber_gets_the_same_frame() {
    let server = setup_test_server().await;
    let mut first = subscribe(server.addr, "/ws").await;
    let mut second = subscribe(server.addr, "/").await;
    wait_for_subscribers(&server.hub, 2).await;

    server.ingestor.on_message(FRAME).await.unwrap();

    assert_eq!(next_binary(&mut first).await, next_binary(&mut second).await);

    server.shutdown.cancel();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn closed_subscriber_is_removed() {
    let server = setup_test_server().await;
    let mut ws = subscribe(server.addr, "/ws").await;
    wait_for_subscribers(&server.hub, 1).await;

    ws.close(None).await.unwrap();
    wait_for_subscribers(&server.hub, 0).await;

    // Publishing with nobody listening is still a successful batch.
    let report = server.ingestor.on_message(FRAME).await.unwrap();
    assert_eq!(report.receivers, 0);

    server.shutdown.cancel();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn inbound_messages_are_ignored() {
    let server = setup_test_server().await;
    let mut ws = subscribe(server.addr, "/ws").await;
    wait_for_subscribers(&server.hub, 1).await;

    ws.send(Message::Text("subscribe BTCUSDT".into())).await.unwrap();
    ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();

    server.ingestor.on_message(FRAME).await.unwrap();
    let batch: Vec<TickRecord> = CompressionCodec::new()
        .decode(&next_binary(&mut ws).await)
        .unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(server.hub.subscriber_count(), 1);

    server.shutdown.cancel();
    server.handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_subscribers() {
    let server = setup_test_server().await;
    let mut ws = subscribe(server.addr, "/ws").await;
    wait_for_subscribers(&server.hub, 1).await;

    server.shutdown.cancel();

    let closed = timeout(Duration::from_secs(5), async {
        while let Some(message) = ws.next().await {
            if matches!(message, Ok(Message::Close(_)) | Err(_)) {
                return true;
            }
        }
        true
    })
    .await
    .unwrap();
    assert!(closed);

    server.handle.await.unwrap();
    wait_for_subscribers(&server.hub, 0).await;
}
