//! In-Memory Store
//!
//! Process-local identity table and tick series with the same contract as
//! the SQLite store. Used for `STORE_BACKEND=memory` and in tests.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{IdentityStore, StoreError, TickStore};
use crate::domain::identity::{IdentityMap, SymbolIdentity};
use crate::domain::tick::{CoinId, TickRecord, TimeRange};

#[derive(Debug, Default)]
struct State {
    identities: IdentityMap,
    ticks: Vec<TickRecord>,
}

/// Volatile identity and tick store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored ticks.
    #[must_use]
    pub fn tick_count(&self) -> usize {
        self.state.read().ticks.len()
    }

    /// Every stored tick in insertion order.
    #[must_use]
    pub fn all_ticks(&self) -> Vec<TickRecord> {
        self.state.read().ticks.clone()
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn load_identities(&self) -> Result<Vec<SymbolIdentity>, StoreError> {
        let mut identities: Vec<_> = self
            .state
            .read()
            .identities
            .iter()
            .map(|(pair, coin_id)| SymbolIdentity::new(pair.clone(), coin_id))
            .collect();
        identities.sort_by_key(|identity| identity.coin_id);
        Ok(identities)
    }

    async fn insert_identity(&self, identity: &SymbolIdentity) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.identities.get(&identity.trading_pair).is_some() {
            return Err(StoreError::Conflict(format!(
                "trading pair {} already exists",
                identity.trading_pair
            )));
        }
        state
            .identities
            .insert(identity.clone())
            .map_err(|e| StoreError::Conflict(e.to_string()))
    }

    async fn find_identity(&self, trading_pair: &str) -> Result<Option<CoinId>, StoreError> {
        Ok(self.state.read().identities.get(trading_pair))
    }
}

#[async_trait]
impl TickStore for InMemoryStore {
    async fn insert_ticks(&self, records: &[TickRecord]) -> Result<usize, StoreError> {
        self.state.write().ticks.extend_from_slice(records);
        Ok(records.len())
    }

    async fn find_ticks(
        &self,
        coin_id: CoinId,
        range: &TimeRange,
    ) -> Result<Vec<TickRecord>, StoreError> {
        let mut found: Vec<_> = self
            .state
            .read()
            .ticks
            .iter()
            .filter(|t| t.coin_id == coin_id && range.contains(t.event_timestamp))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        found.sort_by_key(|t| t.event_timestamp);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;

    fn tick(coin: u32, millis: i64, price: &str) -> TickRecord {
        let price = Decimal::from_str(price).unwrap();
        TickRecord {
            coin_id: CoinId::new(coin),
            trading_pair: format!("PAIR{coin}"),
            event_timestamp: Utc.timestamp_millis_opt(millis).unwrap(),
            current_price: price,
            opening_price: price,
            highest_price_24h: price,
            lowest_price_24h: price,
            total_traded_volume: Decimal::ONE,
            total_traded_quote_volume: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn identities_are_unique_both_ways() {
        let store = InMemoryStore::new();
        store
            .insert_identity(&SymbolIdentity::new("BTCUSDT", CoinId::new(1)))
            .await
            .unwrap();

        assert!(
            store
                .insert_identity(&SymbolIdentity::new("BTCUSDT", CoinId::new(1)))
                .await
                .is_err()
        );
        assert!(
            store
                .insert_identity(&SymbolIdentity::new("ETHUSDT", CoinId::new(1)))
                .await
                .is_err()
        );
        assert_eq!(store.load_identities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_ticks_sorts_and_filters() {
        let store = InMemoryStore::new();
        store
            .insert_ticks(&[
                tick(1, 300, "3"),
                tick(1, 100, "1.1"),
                tick(2, 200, "9"),
                tick(1, 100, "1.2"),
                tick(1, 500, "5"),
            ])
            .await
            .unwrap();

        let found = store
            .find_ticks(
                CoinId::new(1),
                &TimeRange::new(
                    Utc.timestamp_millis_opt(100).unwrap(),
                    Utc.timestamp_millis_opt(300).unwrap(),
                ),
            )
            .await
            .unwrap();
        let prices: Vec<_> = found.iter().map(|t| t.current_price.to_string()).collect();
        assert_eq!(prices, vec!["1.1", "1.2", "3"]);
    }
}
