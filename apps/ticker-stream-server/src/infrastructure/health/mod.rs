//! Health Check and Metrics Endpoint
//!
//! Liveness, readiness and a JSON status report covering the upstream feed,
//! subscribers, pending writes and known trading pairs, plus the Prometheus
//! scrape endpoint. Served on its own port so probes never queue behind
//! range queries.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (upstream feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{PersistenceBuffer, PersistenceMode, SymbolIdentityCache};
use crate::domain::streaming::{ConnectionState, FeedState};
use crate::infrastructure::broadcast::{BroadcastStats, LagPolicy, SharedBroadcastHub};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Server version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream feed status.
    pub feed: FeedInfo,
    /// Live subscriber status.
    pub subscribers: SubscriberStatus,
    /// Tick persistence status.
    pub persistence: PersistenceStatus,
    /// Trading pairs with an assigned coin id.
    pub known_identities: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some systems degraded but functional.
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

impl HealthStatus {
    /// Health implied by the upstream connection state.
    #[must_use]
    pub const fn from_connection(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting | ConnectionState::Reconnecting => Self::Degraded,
            ConnectionState::Disconnected | ConnectionState::Error => Self::Unhealthy,
        }
    }
}

/// Upstream feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the feed is connected.
    pub connected: bool,
    /// Last successful connection.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last reported error.
    pub last_error: Option<String>,
    /// Frames received since startup.
    pub messages_received: u64,
    /// Current reconnect attempts (0 if connected).
    pub reconnect_attempts: u32,
}

/// Live subscriber status.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberStatus {
    /// Registered subscribers.
    pub connected: usize,
    /// Frames published since startup.
    pub frames_published: u64,
    /// Frames skipped by current subscribers.
    pub frames_dropped: u64,
    /// Slow subscriber handling.
    pub lag_policy: LagPolicy,
}

/// Tick persistence status.
#[derive(Debug, Clone, Serialize)]
pub struct PersistenceStatus {
    /// Immediate or buffered writes.
    pub mode: PersistenceMode,
    /// Records waiting for the next flush.
    pub pending_records: usize,
}

impl From<&FeedState> for FeedInfo {
    fn from(feed: &FeedState) -> Self {
        let state = feed.state();
        Self {
            state,
            connected: state == ConnectionState::Connected,
            last_connected_at: feed.last_connected_at(),
            last_error: feed.error_message(),
            messages_received: feed.messages_received(),
            reconnect_attempts: feed.reconnect_attempts(),
        }
    }
}

impl From<BroadcastStats> for SubscriberStatus {
    fn from(stats: BroadcastStats) -> Self {
        Self {
            connected: stats.subscribers,
            frames_published: stats.frames_published,
            frames_dropped: stats.frames_dropped,
            lag_policy: stats.lag_policy,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed_state: Arc<FeedState>,
    broadcast_hub: SharedBroadcastHub,
    buffer: Arc<PersistenceBuffer>,
    identities: Arc<SymbolIdentityCache>,
    mode: PersistenceMode,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed_state: Arc<FeedState>,
        broadcast_hub: SharedBroadcastHub,
        buffer: Arc<PersistenceBuffer>,
        identities: Arc<SymbolIdentityCache>,
        mode: PersistenceMode,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed_state,
            broadcast_hub,
            buffer,
            identities,
            mode,
        }
    }

    /// Point-in-time health report.
    #[must_use]
    pub fn snapshot(&self) -> HealthResponse {
        let feed = FeedInfo::from(self.feed_state.as_ref());
        HealthResponse {
            status: HealthStatus::from_connection(feed.state),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            feed,
            subscribers: self.broadcast_hub.stats().into(),
            persistence: PersistenceStatus {
                mode: self.mode,
                pending_records: self.buffer.pending_len(),
            },
            known_identities: self.identities.len(),
        }
    }

    fn ready(&self) -> bool {
        self.feed_state.state() == ConnectionState::Connected
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Bind the health server.
    ///
    /// # Errors
    ///
    /// Returns [`HealthServerError::BindFailed`] if the port is unavailable.
    pub async fn bind(
        port: u16,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Result<Self, HealthServerError> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|e| HealthServerError::BindFailed(port, e.to_string()))?;
        Ok(Self {
            listener,
            state,
            cancel,
        })
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`HealthServerError::ServerFailed`] if the server stops abnormally.
    pub async fn run(self) -> Result<(), HealthServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "Health server listening");
        }

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Health routes over `state`.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.snapshot();
    let code = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report)).into_response()
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> Response {
    if state.ready() {
        (StatusCode::OK, "READY").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY").into_response()
    }
}

async fn metrics_handler() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response();
    };
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
        .into_response()
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
