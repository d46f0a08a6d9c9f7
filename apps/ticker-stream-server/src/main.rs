//! Ticker Stream Server Binary
//!
//! Starts the ticker ingestion, fan-out and query service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-stream-server
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//!
//! - `PORT`: API and subscriber WebSocket port (default: 8080)
//! - `HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `UPSTREAM_URL`: Exchange stream (default: `wss://stream.binance.com:9443/ws/!ticker@arr`)
//! - `INGEST_QUEUE_CAPACITY`: Raw frames buffered before ingestion (default: 1024)
//! - `HEARTBEAT_INTERVAL_SECS` / `HEARTBEAT_TIMEOUT_SECS` (default: 30 / 60)
//! - `RECONNECT_DELAY_INITIAL_MS` / `RECONNECT_DELAY_MAX_SECS` (default: 500 / 30)
//! - `RECONNECT_DELAY_MULTIPLIER` / `MAX_RECONNECT_ATTEMPTS` (default: 2.0 / 0 = unlimited)
//! - `STORE_BACKEND`: sqlite | memory (default: sqlite)
//! - `DATABASE_PATH`: SQLite file (default: data/ticker.db)
//! - `PERSISTENCE_MODE`: immediate | buffered (default: immediate)
//! - `FLUSH_INTERVAL_MS` / `MAX_PENDING_RECORDS` / `FLUSH_MAX_ATTEMPTS` (default: 1000 / 100000 / 5)
//! - `DEAD_LETTER_PATH`: empty disables (default: data/dead-letter.jsonl)
//! - `BROADCAST_CAPACITY` / `LAG_POLICY`: drop-oldest | disconnect (default: 256 / drop-oldest)
//! - `QUERY_TIMEOUT_MS`: Range query bound (default: 10000)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ticker-stream-server)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ticker_stream_server::application::ports::{SharedIdentityStore, SharedTickStore, StoreError};
use ticker_stream_server::infrastructure::config::StoreSettings;
use ticker_stream_server::infrastructure::metrics;
use ticker_stream_server::infrastructure::telemetry;
use ticker_stream_server::{
    ApiServer, ApiState, BinanceFeedClient, BroadcastConfig, BroadcastHub, CompressionCodec,
    ConnectionState, FeedClientConfig, FeedEvent, FeedState, HealthServer, HealthServerState,
    InMemoryStore, JsonlDeadLetter, PersistenceBuffer, QueryService, ServerConfig, SqliteStore,
    StoreBackend, SymbolIdentityCache, TickIngestor, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Ticker Stream Server");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = ServerConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let flush_token = CancellationToken::new();

    // Durable store and identity cache; hydration must finish before ingestion
    let (identity_store, tick_store) = open_stores(&config.store)?;
    let identity_cache = Arc::new(SymbolIdentityCache::hydrate(Arc::clone(&identity_store)).await?);

    // Persistence buffer and its flush loop
    let mut buffer = PersistenceBuffer::new(
        Arc::clone(&tick_store),
        config.persistence.buffer_config(),
    );
    if let Some(path) = &config.persistence.dead_letter_path {
        buffer = buffer.with_dead_letter(Arc::new(JsonlDeadLetter::new(path)));
    }
    let buffer = Arc::new(buffer);
    let flush_handle = tokio::spawn(Arc::clone(&buffer).run(flush_token.clone()));

    // Subscriber fan-out
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));

    // Ingestion pipeline
    let ingestor = Arc::new(TickIngestor::new(
        Arc::clone(&identity_cache),
        Arc::clone(&buffer),
        Arc::clone(&broadcast_hub),
        CompressionCodec::new(),
        config.persistence.mode,
    ));

    // Range queries
    let query_service = Arc::new(
        QueryService::new(Arc::clone(&identity_store), Arc::clone(&tick_store))
            .with_timeout(config.query_timeout),
    );

    // Upstream feed
    let feed_state = Arc::new(FeedState::new());
    feed_state.set_state(ConnectionState::Connecting);
    let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(config.upstream.ingest_queue_capacity);
    let feed_client = Arc::new(BinanceFeedClient::new(
        FeedClientConfig::from(&config.upstream),
        feed_tx,
        shutdown_token.clone(),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_state),
        Arc::clone(&broadcast_hub),
        Arc::clone(&buffer),
        Arc::clone(&identity_cache),
        config.persistence.mode,
    ));
    let health_server = HealthServer::bind(
        config.server.health_port,
        Arc::clone(&health_state),
        shutdown_token.clone(),
    )
    .await?;

    // API server
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.server.api_port));
    let api_server = ApiServer::bind(
        api_addr,
        ApiState::new(
            query_service,
            Arc::clone(&broadcast_hub),
            shutdown_token.clone(),
        ),
    )
    .await?;

    // Spawn feed event handler
    let handler_ingestor = Arc::clone(&ingestor);
    let handler_feed_state = Arc::clone(&feed_state);
    let ingest_handle = tokio::spawn(async move {
        handle_feed_events(feed_rx, handler_ingestor, handler_feed_state).await;
    });

    // Spawn feed client
    let client_feed_state = Arc::clone(&feed_state);
    tokio::spawn(async move {
        if let Err(e) = feed_client.run().await {
            client_feed_state.set_error(e.to_string());
            tracing::error!(error = %e, "Feed client stopped");
        }
    });

    // Spawn health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn API server
    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Ticker stream server ready");

    await_shutdown(shutdown_token).await;

    broadcast_hub.close_all();

    // Ingestion drains once the feed client drops its sender; the final
    // flush runs after that so no accepted batch is left pending.
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = ingest_handle.await;
        flush_token.cancel();
        let _ = flush_handle.await;
    })
    .await;

    if drained.is_err() {
        tracing::error!(
            pending = buffer.pending_len(),
            "Shutdown timed out before pending records were flushed"
        );
    }

    tracing::info!("Ticker stream server stopped");
    Ok(())
}

/// Open the configured store, returning it behind both port interfaces.
fn open_stores(
    settings: &StoreSettings,
) -> Result<(SharedIdentityStore, SharedTickStore), StoreError> {
    match settings.backend {
        StoreBackend::Sqlite => {
            let store = Arc::new(SqliteStore::open(&settings.database_path)?);
            tracing::info!(path = %settings.database_path.display(), "Opened SQLite store");
            let identities: SharedIdentityStore = store.clone();
            let ticks: SharedTickStore = store;
            Ok((identities, ticks))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; ticks are lost on restart");
            let store = Arc::new(InMemoryStore::new());
            let identities: SharedIdentityStore = store.clone();
            let ticks: SharedTickStore = store;
            Ok((identities, ticks))
        }
    }
}

/// Handle events from the upstream feed client.
async fn handle_feed_events(
    mut rx: mpsc::Receiver<FeedEvent>,
    ingestor: Arc<TickIngestor>,
    feed_state: Arc<FeedState>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected => {
                feed_state.set_state(ConnectionState::Connected);
                metrics::set_upstream_connected(true);
                tracing::info!("Upstream feed connected");
            }
            FeedEvent::Disconnected { reason } => {
                feed_state.set_state(ConnectionState::Disconnected);
                feed_state.record_error(reason.clone());
                metrics::set_upstream_connected(false);
                tracing::warn!(reason = %reason, "Upstream feed disconnected");
            }
            FeedEvent::Reconnecting { attempt, delay } => {
                feed_state.set_reconnecting(attempt);
                metrics::record_reconnect();
                tracing::info!(attempt, delay_ms = delay.as_millis(), "Upstream feed reconnecting");
            }
            FeedEvent::Batch(raw) => {
                feed_state.increment_messages();
                // Failures are logged and counted by the ingestor; the feed
                // keeps running.
                let _ = ingestor.on_message(&raw).await;
            }
            FeedEvent::Error(msg) => {
                feed_state.set_error(msg.clone());
                metrics::set_upstream_connected(false);
                tracing::error!(error = %msg, "Upstream feed error");
            }
        }
    }
    tracing::info!("Feed event channel closed, ingestion stopped");
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        api_port = config.server.api_port,
        health_port = config.server.health_port,
        store = config.store.backend.as_str(),
        persistence_mode = %config.persistence.mode,
        lag_policy = config.broadcast.lag_policy.as_str(),
        "Configuration loaded"
    );
    tracing::debug!(
        upstream_url = %config.upstream.url,
        ingest_queue_capacity = config.upstream.ingest_queue_capacity,
        broadcast_capacity = config.broadcast.capacity,
        max_pending = config.persistence.max_pending,
        query_timeout_ms = config.query_timeout.as_millis(),
        "Runtime tuning"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
