//! Symbol Identity
//!
//! Append-only mapping from trading pair to [`CoinId`].
//!
//! The map is injective (no two pairs share an identifier) and never
//! reassigns or removes an entry. It tracks the highest identifier seen so
//! the next allocation is always `max + 1`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::tick::{CoinId, TradingPair};

/// A `(tradingPair, coinId)` pair as stored in the identity table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolIdentity {
    /// Exchange symbol.
    pub trading_pair: TradingPair,
    /// Assigned identifier.
    pub coin_id: CoinId,
}

impl SymbolIdentity {
    /// Create a new identity pair.
    #[must_use]
    pub fn new(trading_pair: impl Into<TradingPair>, coin_id: CoinId) -> Self {
        Self {
            trading_pair: trading_pair.into(),
            coin_id,
        }
    }
}

/// Violations of the identity map invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityConflict {
    /// The pair is already mapped to a different identifier.
    #[error("trading pair {trading_pair} already mapped to {existing}, refusing {requested}")]
    PairReassigned {
        /// Pair in question.
        trading_pair: TradingPair,
        /// Identifier already held.
        existing: CoinId,
        /// Identifier that was offered.
        requested: CoinId,
    },

    /// The identifier is already held by another pair.
    #[error("coin id {coin_id} already held by {holder}")]
    IdReused {
        /// Identifier in question.
        coin_id: CoinId,
        /// Pair currently holding it.
        holder: TradingPair,
    },
}

/// In-memory identity table.
#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    by_pair: HashMap<TradingPair, CoinId>,
    by_id: HashMap<CoinId, TradingPair>,
    max_id: Option<CoinId>,
}

impl IdentityMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from stored identities, rejecting any invariant violation.
    ///
    /// # Errors
    ///
    /// Returns the first conflict found among `identities`.
    pub fn from_identities(
        identities: impl IntoIterator<Item = SymbolIdentity>,
    ) -> Result<Self, IdentityConflict> {
        let mut map = Self::new();
        for identity in identities {
            map.insert(identity)?;
        }
        Ok(map)
    }

    /// Look up the identifier for a pair.
    #[must_use]
    pub fn get(&self, trading_pair: &str) -> Option<CoinId> {
        self.by_pair.get(trading_pair).copied()
    }

    /// Insert an identity. Re-inserting an identical pair is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityConflict`] when the pair or the identifier is
    /// already bound to something else.
    pub fn insert(&mut self, identity: SymbolIdentity) -> Result<(), IdentityConflict> {
        if let Some(&existing) = self.by_pair.get(&identity.trading_pair) {
            if existing == identity.coin_id {
                return Ok(());
            }
            return Err(IdentityConflict::PairReassigned {
                trading_pair: identity.trading_pair,
                existing,
                requested: identity.coin_id,
            });
        }
        if let Some(holder) = self.by_id.get(&identity.coin_id) {
            return Err(IdentityConflict::IdReused {
                coin_id: identity.coin_id,
                holder: holder.clone(),
            });
        }

        self.max_id = self.max_id.max(Some(identity.coin_id));
        self.by_id
            .insert(identity.coin_id, identity.trading_pair.clone());
        self.by_pair.insert(identity.trading_pair, identity.coin_id);
        Ok(())
    }

    /// Iterate over `(tradingPair, coinId)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&TradingPair, CoinId)> {
        self.by_pair.iter().map(|(pair, &id)| (pair, id))
    }

    /// Highest identifier in the map, if any.
    #[must_use]
    pub const fn max_id(&self) -> Option<CoinId> {
        self.max_id
    }

    /// Identifier the next new pair should receive.
    #[must_use]
    pub fn next_id(&self) -> CoinId {
        self.max_id.map_or(CoinId::new(1), CoinId::next)
    }

    /// Number of known pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_pair.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }
}
