#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Ticker Stream Server - Market Ticker Ingestion and Fan-out
//!
//! Maintains a single connection to the exchange's all-market ticker feed,
//! assigns each trading pair a stable coin id, persists every tick, and
//! pushes each batch (zlib-compressed JSON) to live WebSocket subscribers.
//! Historical ticks are served through a range-query endpoint.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `tick`: Tick records, coin ids, time ranges
//!   - `identity`: Trading pair to coin id mapping
//!   - `search`: Range query validation
//!   - `streaming`: Upstream feed state
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Store and dead-letter interfaces
//!   - `services`: Identity cache, persistence buffer, ingestion, queries
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Upstream WebSocket client
//!   - `codec`: Subscriber frame compression
//!   - `broadcast`: Subscriber fan-out
//!   - `persistence`: SQLite, in-memory and dead-letter adapters
//!   - `http`: Range query endpoint and subscriber WebSocket
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                         ┌───────────────┐    ┌──────────────┐
//! Binance !ticker@arr ───►│ TickIngestor  │───►│ BroadcastHub │──► Subscriber 1
//!        (bounded queue)  │ decode/resolve│    └──────────────┘──► Subscriber N
//!                         └──────┬────────┘
//!                                ▼
//!                       ┌──────────────────┐    ┌─────────────┐
//!                       │PersistenceBuffer │───►│  TickStore  │◄── QueryService
//!                       └──────────────────┘    └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core ticker types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::identity::{IdentityMap, SymbolIdentity};
pub use domain::search::{DateInput, SearchRequest};
pub use domain::streaming::{ConnectionState, FeedState};
pub use domain::tick::{CoinId, TickRecord, TickSnapshot, TimeRange, TradingPair};

// Ports
pub use application::ports::{DeadLetterSink, IdentityStore, StoreError, TickStore};

// Services
pub use application::services::{
    BatchReport, BufferConfig, IngestError, PersistenceBuffer, PersistenceMode, QueryError,
    QueryService, SymbolIdentityCache, TickIngestor,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServerConfig, StoreBackend};

// Upstream client
pub use infrastructure::binance::{BinanceFeedClient, FeedClientConfig, FeedEvent};

// Broadcast hub and codec (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, LagPolicy, SharedBroadcastHub,
};
pub use infrastructure::codec::{CodecError, CompressionCodec};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::http::{ApiServer, ApiServerError, ApiState};

// Stores
pub use infrastructure::persistence::{InMemoryStore, JsonlDeadLetter, SqliteStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
