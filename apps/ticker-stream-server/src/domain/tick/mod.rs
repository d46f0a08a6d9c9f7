//! Tick Types
//!
//! Canonical representation of one trading pair's 24h ticker snapshot.
//!
//! A tick starts life as a [`TickSnapshot`] (normalized from the exchange
//! wire format, no identifier yet) and becomes a [`TickRecord`] once its
//! trading pair has been resolved to a [`CoinId`]. Records are immutable
//! after construction.
//!
//! # JSON Shape
//!
//! Records serialize with the field names the dashboard consumes:
//!
//! ```json
//! {
//!   "coinId": 1,
//!   "tradingPair": "BTCUSDT",
//!   "eventTimestamp": "2024-01-15T10:00:00.123Z",
//!   "currentPrice": "42150.01",
//!   "openingPrice": "41980.00",
//!   "highestPrice24h": "42500.00",
//!   "lowestPrice24h": "41800.55",
//!   "totalTradedVolume": "18234.1200",
//!   "totalTradedQuoteVolume": "768123456.78"
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// A trading pair symbol as the exchange spells it (e.g. `BTCUSDT`).
pub type TradingPair = String;

/// Process-assigned integer standing in for a trading pair in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoinId(u32);

impl CoinId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The identifier allocated after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for CoinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Tick Snapshot (pre-identity)
// =============================================================================

/// A normalized tick whose trading pair has not been resolved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSnapshot {
    /// Exchange symbol.
    pub trading_pair: TradingPair,
    /// Exchange event time.
    pub event_timestamp: DateTime<Utc>,
    /// Last price.
    pub current_price: Decimal,
    /// Price 24h ago.
    pub opening_price: Decimal,
    /// Highest price over the rolling 24h window.
    pub highest_price_24h: Decimal,
    /// Lowest price over the rolling 24h window.
    pub lowest_price_24h: Decimal,
    /// Traded base asset volume over the window.
    pub total_traded_volume: Decimal,
    /// Traded quote asset volume over the window.
    pub total_traded_quote_volume: Decimal,
}

impl TickSnapshot {
    /// Attach a resolved identifier, producing the persisted/broadcast form.
    #[must_use]
    pub fn identify(self, coin_id: CoinId) -> TickRecord {
        TickRecord {
            coin_id,
            trading_pair: self.trading_pair,
            event_timestamp: self.event_timestamp,
            current_price: self.current_price,
            opening_price: self.opening_price,
            highest_price_24h: self.highest_price_24h,
            lowest_price_24h: self.lowest_price_24h,
            total_traded_volume: self.total_traded_volume,
            total_traded_quote_volume: self.total_traded_quote_volume,
        }
    }
}

// =============================================================================
// Tick Record
// =============================================================================

/// One symbol's price/volume snapshot at one moment, tagged with its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRecord {
    /// Identifier of the trading pair.
    pub coin_id: CoinId,
    /// Exchange symbol (informational).
    pub trading_pair: TradingPair,
    /// Exchange event time.
    pub event_timestamp: DateTime<Utc>,
    /// Last price.
    pub current_price: Decimal,
    /// Price 24h ago.
    pub opening_price: Decimal,
    /// Highest price over the rolling 24h window.
    #[serde(rename = "highestPrice24h")]
    pub highest_price_24h: Decimal,
    /// Lowest price over the rolling 24h window.
    #[serde(rename = "lowestPrice24h")]
    pub lowest_price_24h: Decimal,
    /// Traded base asset volume over the window.
    pub total_traded_volume: Decimal,
    /// Traded quote asset volume over the window.
    pub total_traded_quote_volume: Decimal,
}

// =============================================================================
// Time Range
// =============================================================================

/// Inclusive range of event timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest event time included.
    pub start: DateTime<Utc>,
    /// Latest event time included.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range. A start after the end yields an empty range, not an error.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether `at` lies inside the range (both bounds inclusive).
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Whether no timestamp can match.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}
