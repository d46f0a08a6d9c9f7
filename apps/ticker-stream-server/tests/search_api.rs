//! Range Query Integration Tests
//!
//! Ticks ingested into a file-backed `SQLite` store and read back through
//! `POST /api/searchCoinData`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ticker_stream_server::{
    ApiServer, ApiState, BroadcastHub, BufferConfig, CompressionCodec, PersistenceBuffer,
    PersistenceMode, QueryService, SqliteStore, SymbolIdentityCache, TickIngestor, TickRecord,
};

fn frame(event_ms: i64, pairs: &[(&str, &str)]) -> String {
    let entries: Vec<Value> = pairs
        .iter()
        .map(|(symbol, price)| {
            json!({
                "e": "24hrTicker",
                "E": event_ms,
                "s": symbol,
                "c": price,
                "o": "1.0",
                "h": "2.0",
                "l": "0.5",
                "v": "100",
                "q": "150",
            })
        })
        .collect();
    Value::Array(entries).to_string()
}

async fn pipeline(path: &Path) -> (TickIngestor, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open(path).unwrap());
    let cache = Arc::new(SymbolIdentityCache::hydrate(store.clone()).await.unwrap());
    let buffer = Arc::new(PersistenceBuffer::new(store.clone(), BufferConfig::default()));
    let ingestor = TickIngestor::new(
        cache,
        buffer,
        Arc::new(BroadcastHub::with_defaults()),
        CompressionCodec::new(),
        PersistenceMode::Immediate,
    );
    (ingestor, store)
}

async fn serve(store: Arc<SqliteStore>) -> (SocketAddr, CancellationToken) {
    let shutdown = CancellationToken::new();
    let query = Arc::new(QueryService::new(store.clone(), store));
    let state = ApiState::new(query, Arc::new(BroadcastHub::with_defaults()), shutdown.clone());
    let server = ApiServer::bind("127.0.0.1:0".parse().unwrap(), state)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, shutdown)
}

async fn search(addr: SocketAddr, body: Value) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/searchCoinData"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn returns_inclusive_range_oldest_first() {
    let dir = TempDir::new().unwrap();
    let (ingestor, store) = pipeline(&dir.path().join("ticks.db")).await;

    // 10:00, 10:01, 10:02 and 10:03 UTC on 2024-01-15, delivered out of order.
    ingestor
        .on_message(&frame(1_705_312_920_000, &[("BTCUSDT", "42002")]))
        .await
        .unwrap();
    ingestor
        .on_message(&frame(1_705_312_800_000, &[("BTCUSDT", "42000"), ("ETHUSDT", "2500")]))
        .await
        .unwrap();
    ingestor
        .on_message(&frame(1_705_312_860_000, &[("BTCUSDT", "42001")]))
        .await
        .unwrap();
    ingestor
        .on_message(&frame(1_705_312_980_000, &[("BTCUSDT", "42003")]))
        .await
        .unwrap();

    let (addr, shutdown) = serve(store).await;
    let (status, body) = search(
        addr,
        json!({
            "startDate": "2024-01-15T10:00:00Z",
            "endDate": "2024-01-15T10:02:00Z",
            "coinName": "BTCUSDT",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], 1);
    let records: Vec<TickRecord> = serde_json::from_value(body["data"].clone()).unwrap();
    let prices: Vec<String> = records.iter().map(|r| r.current_price.to_string()).collect();
    assert_eq!(prices, vec!["42000", "42001", "42002"]);
    assert!(records.iter().all(|r| r.coin_id.value() == 1));

    shutdown.cancel();
}

#[tokio::test]
async fn epoch_millis_dates_are_accepted() {
    let dir = TempDir::new().unwrap();
    let (ingestor, store) = pipeline(&dir.path().join("ticks.db")).await;
    ingestor
        .on_message(&frame(1_705_312_800_000, &[("ETHUSDT", "2500")]))
        .await
        .unwrap();

    let (addr, shutdown) = serve(store).await;
    let (status, body) = search(
        addr,
        json!({
            "startDate": 1_705_312_800_000_i64,
            "endDate": 1_705_312_800_000_i64,
            "coinName": "ETHUSDT",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn unknown_coin_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (_ingestor, store) = pipeline(&dir.path().join("ticks.db")).await;
    let (addr, shutdown) = serve(store).await;

    let (status, body) = search(
        addr,
        json!({
            "startDate": "2024-01-15T00:00:00Z",
            "endDate": "2024-01-16T00:00:00Z",
            "coinName": "DOGEUSDT",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({ "status": 0, "data": {}, "errors": ["Coin not found"] })
    );

    shutdown.cancel();
}

#[tokio::test]
async fn missing_or_malformed_parameters_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (_ingestor, store) = pipeline(&dir.path().join("ticks.db")).await;
    let (addr, shutdown) = serve(store).await;

    for body in [
        json!({ "startDate": "2024-01-15T00:00:00Z", "coinName": "BTCUSDT" }),
        json!({ "startDate": "yesterday", "endDate": "today", "coinName": "BTCUSDT" }),
        json!({ "startDate": "2024-01-15T00:00:00Z", "endDate": "2024-01-16T00:00:00Z", "coinName": "" }),
    ] {
        let (status, response) = search(addr, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response,
            json!({ "status": 0, "errors": ["Invalid request parameters"] })
        );
    }

    shutdown.cancel();
}

#[tokio::test]
async fn identities_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ticks.db");

    {
        let (ingestor, _store) = pipeline(&path).await;
        ingestor
            .on_message(&frame(1_705_312_800_000, &[("BTCUSDT", "42000"), ("ETHUSDT", "2500")]))
            .await
            .unwrap();
    }

    let (ingestor, store) = pipeline(&path).await;
    ingestor
        .on_message(&frame(1_705_312_860_000, &[("SOLUSDT", "98"), ("BTCUSDT", "42001")]))
        .await
        .unwrap();

    let (addr, shutdown) = serve(store).await;
    for (coin, expected_id, expected_count) in [("BTCUSDT", 1, 2), ("ETHUSDT", 2, 1), ("SOLUSDT", 3, 1)] {
        let (status, body) = search(
            addr,
            json!({
                "startDate": "2024-01-15T00:00:00Z",
                "endDate": "2024-01-16T00:00:00Z",
                "coinName": coin,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let records: Vec<TickRecord> = serde_json::from_value(body["data"].clone()).unwrap();
        assert_eq!(records.len(), expected_count, "{coin}");
        assert!(records.iter().all(|r| r.coin_id.value() == expected_id), "{coin}");
    }

    shutdown.cancel();
}
