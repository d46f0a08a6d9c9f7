//! Range Query Service
//!
//! Answers "all ticks for this trading pair between these two instants".
//! The pair is looked up in the durable identity table rather than the
//! in-memory cache, so the answer reflects what is actually stored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::application::ports::{IdentityStore, StoreError, TickStore};
use crate::domain::search::{InvalidSearch, SearchCriteria, SearchRequest};
use crate::domain::tick::TickRecord;
use crate::infrastructure::metrics::{self, QueryOutcome};

/// Default bound on a single search.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Range query failures.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A required parameter is missing or malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidSearch),

    /// The trading pair has never been observed.
    #[error("coin not found: {0}")]
    NotFound(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The search did not finish in time.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl QueryError {
    const fn outcome(&self) -> QueryOutcome {
        match self {
            Self::InvalidRequest(_) => QueryOutcome::Invalid,
            Self::NotFound(_) => QueryOutcome::NotFound,
            Self::Store(_) | Self::Timeout(_) => QueryOutcome::Error,
        }
    }
}

/// Range query over the durable store.
pub struct QueryService {
    identities: Arc<dyn IdentityStore>,
    ticks: Arc<dyn TickStore>,
    timeout: Duration,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl QueryService {
    /// Create a query service with the default timeout.
    #[must_use]
    pub fn new(identities: Arc<dyn IdentityStore>, ticks: Arc<dyn TickStore>) -> Self {
        Self {
            identities,
            ticks,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Override the per-search timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every stored record for the requested pair whose event time lies in
    /// the inclusive range, oldest first.
    ///
    /// An empty result is a success; a start after the end yields one.
    ///
    /// # Errors
    ///
    /// - [`QueryError::InvalidRequest`] when a parameter is missing or bad
    /// - [`QueryError::NotFound`] when the pair is unknown
    /// - [`QueryError::Store`] or [`QueryError::Timeout`] otherwise
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<TickRecord>, QueryError> {
        let started = Instant::now();
        let result = self.run(request).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(records) => {
                metrics::record_query(QueryOutcome::Ok, elapsed);
                tracing::debug!(records = records.len(), elapsed_ms = elapsed.as_millis(), "Search served");
            }
            Err(err) => {
                let outcome = err.outcome();
                metrics::record_query(outcome, elapsed);
                if outcome == QueryOutcome::Error {
                    tracing::error!(error = %err, "Search failed");
                } else {
                    tracing::debug!(error = %err, "Search rejected");
                }
            }
        }

        result
    }

    async fn run(&self, request: &SearchRequest) -> Result<Vec<TickRecord>, QueryError> {
        let criteria = request.validate()?;
        tokio::time::timeout(self.timeout, self.lookup(&criteria))
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))?
    }

    async fn lookup(&self, criteria: &SearchCriteria) -> Result<Vec<TickRecord>, QueryError> {
        let coin_id = self
            .identities
            .find_identity(&criteria.trading_pair)
            .await?
            .ok_or_else(|| QueryError::NotFound(criteria.trading_pair.clone()))?;

        if criteria.range.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = self.ticks.find_ticks(coin_id, &criteria.range).await?;
        records.sort_by_key(|r| r.event_timestamp);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MockIdentityStore, MockTickStore};
    use crate::domain::identity::SymbolIdentity;
    use crate::domain::tick::{CoinId, TickSnapshot};
    use crate::infrastructure::persistence::InMemoryStore;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_312_800 + secs, 0).unwrap()
    }

    fn record(pair: &str, id: u32, secs: i64) -> TickRecord {
        let one = Decimal::from_str("1").unwrap();
        TickSnapshot {
            trading_pair: pair.to_string(),
            event_timestamp: at(secs),
            current_price: one,
            opening_price: one,
            highest_price_24h: one,
            lowest_price_24h: one,
            total_traded_volume: one,
            total_traded_quote_volume: one,
        }
        .identify(CoinId::new(id))
    }

    async fn seeded() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_identity(&SymbolIdentity::new("BTCUSDT", CoinId::new(1)))
            .await
            .unwrap();
        store
            .insert_identity(&SymbolIdentity::new("ETHUSDT", CoinId::new(2)))
            .await
            .unwrap();
        store
            .insert_ticks(&[
                record("BTCUSDT", 1, 20),
                record("ETHUSDT", 2, 5),
                record("BTCUSDT", 1, 0),
                record("BTCUSDT", 1, 10),
                record("BTCUSDT", 1, 99),
            ])
            .await
            .unwrap();
        store
    }

    fn service(store: &Arc<InMemoryStore>) -> QueryService {
        QueryService::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn returns_inclusive_range_in_order() {
        let store = seeded().await;
        let records = service(&store)
            .search(&SearchRequest::new(at(0), at(20), "BTCUSDT"))
            .await
            .unwrap();

        let times: Vec<_> = records.iter().map(|r| r.event_timestamp).collect();
        assert_eq!(times, vec![at(0), at(10), at(20)]);
        assert!(records.iter().all(|r| r.coin_id == CoinId::new(1)));
    }

    #[tokio::test]
    async fn no_matches_is_empty_success() {
        let store = seeded().await;
        let records = service(&store)
            .search(&SearchRequest::new(at(200), at(300), "ETHUSDT"))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn inverted_range_is_empty_success() {
        let store = seeded().await;
        let records = service(&store)
            .search(&SearchRequest::new(at(20), at(0), "BTCUSDT"))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn unknown_pair_is_not_found() {
        let store = seeded().await;
        let err = service(&store)
            .search(&SearchRequest::new(at(0), at(20), "DOGEUSDT"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotFound(pair) if pair == "DOGEUSDT"));
    }

    #[tokio::test]
    async fn pair_lookup_is_exact() {
        let store = seeded().await;
        for name in [" BTCUSDT ", "btcusdt"] {
            let err = service(&store)
                .search(&SearchRequest::new(at(0), at(20), name))
                .await
                .unwrap_err();
            assert!(matches!(err, QueryError::NotFound(_)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn missing_parameter_is_invalid() {
        let store = seeded().await;
        let request = SearchRequest {
            coin_name: None,
            ..SearchRequest::new(at(0), at(20), "BTCUSDT")
        };
        let err = service(&store).search(&request).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidRequest(InvalidSearch::Missing("coinName"))
        ));
    }

    #[tokio::test]
    async fn store_failure_surfaces() {
        let mut identities = MockIdentityStore::new();
        identities
            .expect_find_identity()
            .returning(|_| Err(StoreError::Unavailable("locked".to_string())));
        let ticks = MockTickStore::new();

        let err = QueryService::new(Arc::new(identities), Arc::new(ticks))
            .search(&SearchRequest::new(at(0), at(20), "BTCUSDT"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let mut identities = MockIdentityStore::new();
        identities
            .expect_find_identity()
            .returning(|_| Ok(Some(CoinId::new(1))));

        struct Stalled;

        #[async_trait::async_trait]
        impl TickStore for Stalled {
            async fn insert_ticks(&self, records: &[TickRecord]) -> Result<usize, StoreError> {
                Ok(records.len())
            }

            async fn find_ticks(
                &self,
                _coin_id: CoinId,
                _range: &crate::domain::tick::TimeRange,
            ) -> Result<Vec<TickRecord>, StoreError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }

        let err = QueryService::new(Arc::new(identities), Arc::new(Stalled))
            .with_timeout(Duration::from_millis(100))
            .search(&SearchRequest::new(at(0), at(20), "BTCUSDT"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_)));
    }
}
