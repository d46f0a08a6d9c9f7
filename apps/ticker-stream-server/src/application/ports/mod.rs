//! Port Interfaces
//!
//! Contracts the application services need from the durable store. These
//! follow the Hexagonal Architecture pattern: services depend on these
//! traits, infrastructure adapters implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `IdentityStore`: durable `(tradingPair, coinId)` table
//! - `TickStore`: durable tick time series
//! - `DeadLetterSink`: destination for records a flush gave up on

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::identity::SymbolIdentity;
use crate::domain::tick::{CoinId, TickRecord, TimeRange};

// =============================================================================
// Errors
// =============================================================================

/// Failure reported by a store adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A uniqueness constraint was violated.
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// Stored data could not be mapped back to domain types.
    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    /// The store is not reachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// Ports
// =============================================================================

/// Durable identity table.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load every stored identity.
    async fn load_identities(&self) -> Result<Vec<SymbolIdentity>, StoreError>;

    /// Durably insert a new identity.
    async fn insert_identity(&self, identity: &SymbolIdentity) -> Result<(), StoreError>;

    /// Exact-match lookup of a trading pair.
    async fn find_identity(&self, trading_pair: &str) -> Result<Option<CoinId>, StoreError>;
}

/// Durable tick time series.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Insert a batch of records. All or nothing.
    async fn insert_ticks(&self, records: &[TickRecord]) -> Result<usize, StoreError>;

    /// Records for `coin_id` whose event time lies in `range`, ascending by
    /// event time, ties in insertion order.
    async fn find_ticks(
        &self,
        coin_id: CoinId,
        range: &TimeRange,
    ) -> Result<Vec<TickRecord>, StoreError>;
}

/// Destination for records a flush could not persist.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Append records with the reason they were dead-lettered.
    async fn write(&self, records: &[TickRecord], reason: &str) -> Result<(), StoreError>;
}

/// Shared identity store handle.
pub type SharedIdentityStore = Arc<dyn IdentityStore>;

/// Shared tick store handle.
pub type SharedTickStore = Arc<dyn TickStore>;

/// Shared dead-letter handle.
pub type SharedDeadLetterSink = Arc<dyn DeadLetterSink>;
