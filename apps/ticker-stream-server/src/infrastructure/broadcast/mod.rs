//! Broadcast Hub
//!
//! Fans compressed tick frames out to every live subscriber connection.
//!
//! # Architecture
//!
//! Frames travel over a single bounded `tokio::sync::broadcast` channel; each
//! subscriber owns a receiver with its own ring position, so one slow
//! subscriber never blocks publishing or the other subscribers.
//!
//! Alongside the channel the hub keeps a registry of subscriber entries.
//! An entry carries an `open` flag and a cancellation token: deregistering
//! flips the flag and cancels the token before the entry is removed, so a
//! [`Subscription`] never yields a frame after it has been deregistered,
//! even when deregistration races a publish.
//!
//! # Lag
//!
//! When a subscriber falls more than `capacity` frames behind, the
//! configured [`LagPolicy`] applies: skip the missed frames and continue
//! from the oldest one still buffered, or disconnect the subscriber.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// What to do with a subscriber that falls behind the channel capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LagPolicy {
    /// Skip the frames it missed and continue with the oldest retained one.
    #[default]
    DropOldest,
    /// Deregister the subscriber and close its connection.
    Disconnect,
}

impl LagPolicy {
    /// Configuration spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DropOldest => "drop-oldest",
            Self::Disconnect => "disconnect",
        }
    }
}

impl FromStr for LagPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-oldest" | "drop_oldest" => Ok(Self::DropOldest),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(format!("unknown lag policy: {other}")),
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Frames buffered per subscriber before lag handling kicks in.
    pub capacity: usize,
    /// Lag handling.
    pub lag_policy: LagPolicy,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            lag_policy: LagPolicy::DropOldest,
        }
    }
}

// =============================================================================
// Subscriber Registry
// =============================================================================

/// Unique identifier of one subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct SubscriberEntry {
    id: SubscriberId,
    remote: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    open: AtomicBool,
    cancel: CancellationToken,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

impl SubscriberEntry {
    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.cancel.cancel();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            id: self.id,
            remote: self.remote,
            connected_at: self.connected_at,
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

type Registry = RwLock<HashMap<SubscriberId, Arc<SubscriberEntry>>>;

/// Point-in-time view of one subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    /// Subscriber identifier.
    pub id: SubscriberId,
    /// Peer address, when known.
    pub remote: Option<SocketAddr>,
    /// When the subscriber registered.
    pub connected_at: DateTime<Utc>,
    /// Frames handed to the connection.
    pub frames_delivered: u64,
    /// Frames skipped because the subscriber lagged.
    pub frames_dropped: u64,
}

// =============================================================================
// Errors
// =============================================================================

/// Why a subscription stopped yielding frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberError {
    /// The subscriber was deregistered.
    #[error("subscriber deregistered")]
    Closed,

    /// The subscriber lagged and the policy is to disconnect.
    #[error("subscriber lagged by {skipped} frames")]
    Lagged {
        /// Frames it fell behind by.
        skipped: u64,
    },

    /// The hub itself was dropped.
    #[error("broadcast hub shut down")]
    HubClosed,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Central fan-out point for compressed tick frames.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use ticker_stream_server::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let subscription = hub.register(None);
/// assert_eq!(hub.publish(Bytes::from_static(b"frame")), 1);
/// drop(subscription);
/// assert_eq!(hub.subscriber_count(), 0);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Bytes>,
    registry: Arc<Registry>,
    config: BroadcastConfig,
    frames_published: AtomicU64,
}

impl BroadcastHub {
    /// Create a hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        let (tx, _) = broadcast::channel(config.capacity.max(1));
        Self {
            tx,
            registry: Arc::new(RwLock::new(HashMap::new())),
            config,
            frames_published: AtomicU64::new(0),
        }
    }

    /// Create a hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Add a subscriber. It receives every frame published from now on
    /// until it is deregistered or dropped.
    #[must_use]
    pub fn register(&self, remote: Option<SocketAddr>) -> Subscription {
        let entry = Arc::new(SubscriberEntry {
            id: SubscriberId::new(),
            remote,
            connected_at: Utc::now(),
            open: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            frames_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        });

        let rx = self.tx.subscribe();
        let count = {
            let mut registry = self.registry.write();
            registry.insert(entry.id, Arc::clone(&entry));
            registry.len()
        };
        metrics::set_subscribers(count);
        tracing::info!(subscriber_id = %entry.id, ?remote, subscribers = count, "Subscriber registered");

        Subscription {
            rx,
            entry,
            registry: Arc::clone(&self.registry),
            lag_policy: self.config.lag_policy,
        }
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn deregister(&self, id: SubscriberId) -> bool {
        deregister_from(&self.registry, id)
    }

    /// Publish a frame to every open subscriber.
    ///
    /// Returns the number of receivers the frame was queued for. Publishing
    /// with no subscribers is not an error.
    pub fn publish(&self, frame: Bytes) -> usize {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_published();
        self.tx.send(frame).unwrap_or(0)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Snapshot of every registered subscriber.
    #[must_use]
    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.registry.read().values().map(|e| e.info()).collect()
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        let registry = self.registry.read();
        BroadcastStats {
            subscribers: registry.len(),
            receivers: self.tx.receiver_count(),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_dropped: registry
                .values()
                .map(|e| e.frames_dropped.load(Ordering::Relaxed))
                .sum(),
            capacity: self.config.capacity,
            lag_policy: self.config.lag_policy,
        }
    }

    /// Close every subscriber, used on shutdown.
    pub fn close_all(&self) {
        let entries: Vec<_> = self.registry.write().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.close();
        }
        metrics::set_subscribers(0);
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "Closed all subscribers");
        }
    }
}

fn deregister_from(registry: &Registry, id: SubscriberId) -> bool {
    let (removed, count) = {
        let mut registry = registry.write();
        let removed = registry.remove(&id);
        if let Some(entry) = &removed {
            entry.close();
        }
        (removed, registry.len())
    };

    match removed {
        Some(entry) => {
            metrics::set_subscribers(count);
            tracing::info!(
                subscriber_id = %id,
                delivered = entry.frames_delivered.load(Ordering::Relaxed),
                dropped = entry.frames_dropped.load(Ordering::Relaxed),
                subscribers = count,
                "Subscriber deregistered"
            );
            true
        }
        None => false,
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about the hub.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastStats {
    /// Registered subscribers.
    pub subscribers: usize,
    /// Live channel receivers.
    pub receivers: usize,
    /// Frames published since startup.
    pub frames_published: u64,
    /// Frames skipped by currently registered subscribers.
    pub frames_dropped: u64,
    /// Per-subscriber buffer capacity.
    pub capacity: usize,
    /// Active lag policy.
    pub lag_policy: LagPolicy,
}

// =============================================================================
// Subscription
// =============================================================================

/// One subscriber's view of the hub. Dropping it deregisters the subscriber.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Bytes>,
    entry: Arc<SubscriberEntry>,
    registry: Arc<Registry>,
    lag_policy: LagPolicy,
}

impl Subscription {
    /// This subscriber's identifier.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.entry.id
    }

    /// Whether the subscriber is still registered.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.entry.is_open()
    }

    /// Token cancelled when the subscriber is deregistered.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.entry.cancel.clone()
    }

    /// Wait for the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError::Closed`] once deregistered,
    /// [`SubscriberError::Lagged`] under the disconnect policy, and
    /// [`SubscriberError::HubClosed`] when the hub is gone.
    pub async fn recv(&mut self) -> Result<Bytes, SubscriberError> {
        loop {
            if !self.entry.is_open() {
                return Err(SubscriberError::Closed);
            }

            let result = tokio::select! {
                biased;
                () = self.entry.cancel.cancelled() => return Err(SubscriberError::Closed),
                result = self.rx.recv() => result,
            };

            match result {
                Ok(frame) => {
                    // Deregistered while the frame was in flight.
                    if !self.entry.is_open() {
                        return Err(SubscriberError::Closed);
                    }
                    self.entry.frames_delivered.fetch_add(1, Ordering::Relaxed);
                    return Ok(frame);
                }
                Err(RecvError::Lagged(skipped)) => {
                    self.entry
                        .frames_dropped
                        .fetch_add(skipped, Ordering::Relaxed);
                    metrics::record_frames_dropped(skipped);

                    match self.lag_policy {
                        LagPolicy::DropOldest => {
                            tracing::warn!(
                                subscriber_id = %self.entry.id,
                                skipped,
                                "Subscriber lagging, dropped oldest frames"
                            );
                        }
                        LagPolicy::Disconnect => {
                            tracing::warn!(
                                subscriber_id = %self.entry.id,
                                skipped,
                                "Subscriber lagging, disconnecting"
                            );
                            deregister_from(&self.registry, self.entry.id);
                            return Err(SubscriberError::Lagged { skipped });
                        }
                    }
                }
                Err(RecvError::Closed) => return Err(SubscriberError::HubClosed),
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.entry.is_open() {
            deregister_from(&self.registry, self.entry.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
