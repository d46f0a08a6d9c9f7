//! Binance Feed Client
//!
//! Owns the single long-lived connection to the exchange's all-market
//! ticker stream.
//!
//! # Stream URL
//!
//! - Default: `wss://stream.binance.com:9443/ws/!ticker@arr`
//!
//! # Protocol
//!
//! The stream needs no authentication or subscription request: the server
//! starts pushing JSON arrays of 24h ticker objects about once per second.
//! The server pings periodically and expects a pong with the same payload.
//!
//! The socket reader never touches storage. Text frames are forwarded as
//! [`FeedEvent::Batch`] over a bounded channel to the ingestion task; when
//! that channel is full the reader waits, which applies TCP backpressure to
//! the exchange instead of growing memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::config::UpstreamSettings;

/// Upper bound on the TCP + TLS + WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the feed client.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// The handshake did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket protocol or transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The exchange closed the connection or the stream ended.
    #[error("upstream disconnected: {0}")]
    UpstreamDisconnected(String),

    /// No traffic for longer than the heartbeat timeout.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),

    /// The ingestion side hung up.
    #[error("event channel closed")]
    ChannelClosed,

    /// Reconnect budget exhausted.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Feed Events
// =============================================================================

/// Events emitted by the feed client, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Connection established.
    Connected,
    /// Connection lost.
    Disconnected {
        /// Why it was lost.
        reason: String,
    },
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Attempt number since the last successful connection.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// One raw upstream frame.
    Batch(String),
    /// The client gave up.
    Error(String),
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl FeedClientConfig {
    /// Configuration for `url` with default reconnect and heartbeat tuning.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl From<&UpstreamSettings> for FeedClientConfig {
    fn from(settings: &UpstreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            reconnect: ReconnectConfig::from(settings),
            heartbeat: HeartbeatConfig::from(settings),
        }
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// Exchange ticker stream client.
///
/// Manages the connection lifecycle including:
/// - Heartbeat monitoring and ping/pong
/// - Automatic reconnection with exponential backoff
/// - Bounded hand-off of raw frames to ingestion
pub struct BinanceFeedClient {
    config: FeedClientConfig,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
}

impl BinanceFeedClient {
    /// Create a new feed client.
    #[must_use]
    pub const fn new(
        config: FeedClientConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled, the event channel closes,
    /// or the reconnect budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`FeedClientError::MaxReconnectAttemptsExceeded`] or
    /// [`FeedClientError::ChannelClosed`]; every other failure is retried.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedClientError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect);

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Feed client cancelled");
                return Ok(());
            }

            let err = match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    tracing::info!("Feed client cancelled");
                    return Ok(());
                }
                Err(FeedClientError::ChannelClosed) => return Err(FeedClientError::ChannelClosed),
                Err(e) => e,
            };

            tracing::warn!(error = %err, url = %self.config.url, "Upstream disconnected");
            self.emit(FeedEvent::Disconnected {
                reason: err.to_string(),
            })
            .await?;

            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt();
                tracing::error!(attempts, "Giving up on upstream feed");
                let _ = self
                    .event_tx
                    .send(FeedEvent::Error(format!(
                        "reconnect attempts exhausted after {attempts} tries"
                    )))
                    .await;
                return Err(FeedClientError::MaxReconnectAttemptsExceeded(attempts));
            };

            let attempt = policy.attempt();
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to upstream feed");
            self.emit(FeedEvent::Reconnecting { attempt, delay }).await?;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Feed client cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn emit(&self, event: FeedEvent) -> Result<(), FeedClientError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| FeedClientError::ChannelClosed)
    }

    /// Connect and pump frames until error or cancellation. `Ok` means
    /// cancelled.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedClientError> {
        tracing::info!(url = %self.config.url, "Connecting to upstream feed");

        let connect = tokio_tungstenite::connect_async(self.config.url.as_str());
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(CONNECT_TIMEOUT, connect) => {
                result.map_err(|_| FeedClientError::ConnectTimeout(CONNECT_TIMEOUT))??
            }
        };

        let (mut write, mut read) = ws_stream.split();
        // Backoff resets on the first data frame, not the handshake, so an
        // upstream that accepts and immediately drops still backs off.
        let mut delivered = false;
        tracing::info!(url = %self.config.url, "Upstream feed connected");
        self.emit(FeedEvent::Connected).await?;

        let mut heartbeat = HeartbeatMonitor::new(self.config.heartbeat);
        let mut ticker = tokio::time::interval(heartbeat.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match heartbeat.on_tick(Instant::now()) {
                        HeartbeatAction::Idle => {}
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(Bytes::new())).await?;
                        }
                        HeartbeatAction::TimedOut(silent_for) => {
                            return Err(FeedClientError::HeartbeatTimeout(silent_for));
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_activity();
                            if !std::mem::replace(&mut delivered, true) {
                                policy.reset();
                            }
                            self.emit(FeedEvent::Batch(text.as_str().to_owned())).await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat.record_activity();
                            if !std::mem::replace(&mut delivered, true) {
                                policy.reset();
                            }
                            match String::from_utf8(data.to_vec()) {
                                Ok(text) => self.emit(FeedEvent::Batch(text)).await?,
                                Err(_) => tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            heartbeat.record_activity();
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat.record_activity();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map_or_else(
                                || "close frame without reason".to_string(),
                                |f| format!("{} {}", f.code, f.reason),
                            );
                            return Err(FeedClientError::UpstreamDisconnected(reason));
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(FeedClientError::UpstreamDisconnected(
                                "stream ended".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}
