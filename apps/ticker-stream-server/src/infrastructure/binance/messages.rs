//! Binance Ticker Message Types
//!
//! Wire format of the all-market rolling 24h ticker stream
//! (`!ticker@arr`). Each frame is a JSON array of ticker objects; the
//! combined-stream envelope `{"stream": "...", "data": [...]}` is accepted
//! as well.
//!
//! Only the fields the service stores are deserialized:
//!
//! | Wire | Meaning                   | Maps to                  |
//! |------|---------------------------|--------------------------|
//! | `s`  | Symbol                    | `trading_pair`           |
//! | `E`  | Event time (epoch millis) | `event_timestamp`        |
//! | `c`  | Last price                | `current_price`          |
//! | `o`  | Open price                | `opening_price`          |
//! | `h`  | High price                | `highest_price_24h`      |
//! | `l`  | Low price                 | `lowest_price_24h`       |
//! | `v`  | Base asset volume         | `total_traded_volume`    |
//! | `q`  | Quote asset volume        | `total_traded_quote_volume` |
//!
//! # References
//!
//! - [All Market Rolling Window Statistics Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::tick::TickSnapshot;

/// Decode errors. Any of them rejects the whole frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is JSON but not an array of tickers.
    #[error("expected JSON array of tickers, got: {0}")]
    NotAnArray(String),

    /// An element is missing a field or has an unparsable value.
    #[error("ticker {index} is malformed: {source}")]
    InvalidTicker {
        /// Position in the frame.
        index: usize,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// An element's event time is outside the representable range.
    #[error("ticker {index} has out-of-range event time {millis}")]
    InvalidTimestamp {
        /// Position in the frame.
        index: usize,
        /// Offending value.
        millis: i64,
    },
}

/// One element of the `!ticker@arr` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinanceTicker {
    /// Event type, `24hrTicker`.
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Event time in epoch milliseconds.
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Last price.
    #[serde(rename = "c")]
    pub last_price: Decimal,
    /// Open price.
    #[serde(rename = "o")]
    pub open_price: Decimal,
    /// High price.
    #[serde(rename = "h")]
    pub high_price: Decimal,
    /// Low price.
    #[serde(rename = "l")]
    pub low_price: Decimal,
    /// Total traded base asset volume.
    #[serde(rename = "v")]
    pub base_volume: Decimal,
    /// Total traded quote asset volume.
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
}

impl BinanceTicker {
    /// Normalize into a [`TickSnapshot`]. Returns `None` if the event time
    /// cannot be represented.
    #[must_use]
    pub fn into_snapshot(self) -> Option<TickSnapshot> {
        let event_timestamp = Utc.timestamp_millis_opt(self.event_time).single()?;
        Some(TickSnapshot {
            trading_pair: self.symbol,
            event_timestamp,
            current_price: self.last_price,
            opening_price: self.open_price,
            highest_price_24h: self.high_price,
            lowest_price_24h: self.low_price,
            total_traded_volume: self.base_volume,
            total_traded_quote_volume: self.quote_volume,
        })
    }
}

/// Decode one upstream frame into normalized snapshots, in frame order.
///
/// # Errors
///
/// Returns [`DecodeError`] if the frame is not an array of tickers or any
/// element fails to parse. No partial result is returned.
pub fn decode_batch(text: &str) -> Result<Vec<TickSnapshot>, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let elements = match value {
        serde_json::Value::Array(elements) => elements,
        serde_json::Value::Object(mut envelope) => match envelope.remove("data") {
            Some(serde_json::Value::Array(elements)) => elements,
            _ => return Err(DecodeError::NotAnArray(preview(text))),
        },
        _ => return Err(DecodeError::NotAnArray(preview(text))),
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            let ticker: BinanceTicker = serde_json::from_value(element)
                .map_err(|source| DecodeError::InvalidTicker { index, source })?;
            let millis = ticker.event_time;
            ticker
                .into_snapshot()
                .ok_or(DecodeError::InvalidTimestamp { index, millis })
        })
        .collect()
}

fn preview(text: &str) -> String {
    text.trim().chars().take(50).collect()
}
