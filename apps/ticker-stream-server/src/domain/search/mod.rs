//! Range Search Requests
//!
//! Request body of the historical range query and its validation into
//! [`SearchCriteria`]. Dates may be RFC 3339 strings or epoch milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::tick::{TimeRange, TradingPair};

// =============================================================================
// Request
// =============================================================================

/// A date as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateInput {
    /// Milliseconds since the Unix epoch.
    Millis(i64),
    /// RFC 3339 / ISO 8601 text.
    Text(String),
}

impl DateInput {
    fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }
        }
    }
}

impl From<DateTime<Utc>> for DateInput {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Text(value.to_rfc3339())
    }
}

/// Body of `POST /api/searchCoinData`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Inclusive start of the range.
    #[serde(default)]
    pub start_date: Option<DateInput>,
    /// Inclusive end of the range.
    #[serde(default)]
    pub end_date: Option<DateInput>,
    /// Trading pair to look up.
    #[serde(default)]
    pub coin_name: Option<String>,
}

impl SearchRequest {
    /// Build a fully populated request.
    #[must_use]
    pub fn new(
        start: impl Into<DateInput>,
        end: impl Into<DateInput>,
        coin_name: impl Into<String>,
    ) -> Self {
        Self {
            start_date: Some(start.into()),
            end_date: Some(end.into()),
            coin_name: Some(coin_name.into()),
        }
    }

    /// Validate into search criteria.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSearch`] naming the first missing or malformed field.
    pub fn validate(&self) -> Result<SearchCriteria, InvalidSearch> {
        let start = self
            .start_date
            .as_ref()
            .ok_or(InvalidSearch::Missing("startDate"))?
            .parse()
            .ok_or(InvalidSearch::Malformed("startDate"))?;
        let end = self
            .end_date
            .as_ref()
            .ok_or(InvalidSearch::Missing("endDate"))?
            .parse()
            .ok_or(InvalidSearch::Malformed("endDate"))?;
        let trading_pair = self
            .coin_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or(InvalidSearch::Missing("coinName"))?;

        Ok(SearchCriteria {
            range: TimeRange::new(start, end),
            trading_pair: trading_pair.to_string(),
        })
    }
}

// =============================================================================
// Validated Criteria
// =============================================================================

/// A validated range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Inclusive event time range.
    pub range: TimeRange,
    /// Exact trading pair.
    pub trading_pair: TradingPair,
}

/// Why a request failed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidSearch {
    /// Field absent, null or blank.
    #[error("missing field: {0}")]
    Missing(&'static str),
    /// Field present but not a date.
    #[error("malformed date in field: {0}")]
    Malformed(&'static str),
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn parse(body: &str) -> SearchRequest {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn accepts_rfc3339_and_millis() {
        let request = parse(
            r#"{"startDate":"2024-01-15T00:00:00.000Z","endDate":1705363200000,"coinName":"BTCUSDT"}"#,
        );
        let criteria = request.validate().unwrap();

        assert_eq!(criteria.trading_pair, "BTCUSDT");
        assert_eq!(criteria.range.start.timestamp_millis(), 1_705_276_800_000);
        assert_eq!(criteria.range.end.timestamp_millis(), 1_705_363_200_000);
    }

    #[test_case(r#"{"endDate":1,"coinName":"BTCUSDT"}"#, InvalidSearch::Missing("startDate") ; "no start")]
    #[test_case(r#"{"startDate":1,"coinName":"BTCUSDT"}"#, InvalidSearch::Missing("endDate") ; "no end")]
    #[test_case(r#"{"startDate":1,"endDate":2}"#, InvalidSearch::Missing("coinName") ; "no coin")]
    #[test_case(r#"{"startDate":1,"endDate":2,"coinName":"  "}"#, InvalidSearch::Missing("coinName") ; "blank coin")]
    #[test_case(r#"{"startDate":null,"endDate":2,"coinName":"BTCUSDT"}"#, InvalidSearch::Missing("startDate") ; "null start")]
    #[test_case(r#"{"startDate":"","endDate":2,"coinName":"BTCUSDT"}"#, InvalidSearch::Malformed("startDate") ; "empty start")]
    #[test_case(r#"{"startDate":1,"endDate":"yesterday","coinName":"BTCUSDT"}"#, InvalidSearch::Malformed("endDate") ; "bad end")]
    fn rejects_incomplete_requests(body: &str, expected: InvalidSearch) {
        assert_eq!(parse(body).validate().unwrap_err(), expected);
    }

    #[test]
    fn coin_name_is_kept_verbatim() {
        let request = parse(r#"{"startDate":1,"endDate":2,"coinName":" BTCUSDT "}"#);
        assert_eq!(request.validate().unwrap().trading_pair, " BTCUSDT ");
    }

    #[test]
    fn reversed_range_is_valid() {
        let request = parse(r#"{"startDate":2000,"endDate":1000,"coinName":"ETHUSDT"}"#);
        let criteria = request.validate().unwrap();
        assert!(criteria.range.is_empty());
    }
}
