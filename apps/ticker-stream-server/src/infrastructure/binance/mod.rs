//! Binance Market Data Adapter
//!
//! Upstream side of the service: one WebSocket connection to the
//! all-market 24h ticker stream.
//!
//! - **client**: connection lifecycle, hand-off of raw frames
//! - **messages**: wire types and batch decoding
//! - **heartbeat**: liveness tracking
//! - **reconnect**: backoff policy

pub mod client;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use client::{BinanceFeedClient, FeedClientConfig, FeedClientError, FeedEvent};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
pub use messages::{BinanceTicker, DecodeError, decode_batch};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};

/// Default all-market ticker stream.
pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443/ws/!ticker@arr";
