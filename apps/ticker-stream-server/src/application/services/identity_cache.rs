//! Symbol Identity Cache
//!
//! In-memory mirror of the durable identity table.
//!
//! Lookups of known pairs take a shared read lock. Allocation of a new
//! identifier is serialized by an async mutex and re-checks the map after
//! acquiring it, so two concurrent resolutions of the same unseen pair
//! allocate exactly one identifier. A new identity is written to the store
//! before it enters the map; if the write fails nothing is cached and the
//! counter does not advance.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::application::ports::{IdentityStore, StoreError};
use crate::domain::identity::{IdentityConflict, IdentityMap, SymbolIdentity};
use crate::domain::tick::CoinId;
use crate::infrastructure::metrics;

/// Identity resolution failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Loading the identity table at startup failed.
    #[error("failed to load identities: {0}")]
    Load(#[source] StoreError),

    /// The stored table violates the identity invariants.
    #[error("stored identities are inconsistent: {0}")]
    Inconsistent(#[from] IdentityConflict),

    /// The durable write of a new identity failed.
    #[error("failed to store identity for {trading_pair}: {source}")]
    Write {
        /// Pair being registered.
        trading_pair: String,
        /// Store failure.
        #[source]
        source: StoreError,
    },

    /// The identifier space is used up.
    #[error("coin id space exhausted")]
    Exhausted,
}

/// Trading pair to identifier cache backed by an [`IdentityStore`].
pub struct SymbolIdentityCache {
    store: Arc<dyn IdentityStore>,
    map: RwLock<IdentityMap>,
    allocator: Mutex<()>,
}

impl std::fmt::Debug for SymbolIdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolIdentityCache")
            .field("known", &self.len())
            .finish_non_exhaustive()
    }
}

impl SymbolIdentityCache {
    /// Build the cache from every identity in `store`. Must complete before
    /// ingestion starts.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Load`] if the table cannot be read and
    /// [`IdentityError::Inconsistent`] if it maps a pair or an id twice.
    pub async fn hydrate(store: Arc<dyn IdentityStore>) -> Result<Self, IdentityError> {
        let identities = store.load_identities().await.map_err(IdentityError::Load)?;
        let map = IdentityMap::from_identities(identities)?;

        tracing::info!(
            known = map.len(),
            next_id = %map.next_id(),
            "Identity cache hydrated"
        );
        metrics::set_known_identities(map.len());

        Ok(Self {
            store,
            map: RwLock::new(map),
            allocator: Mutex::new(()),
        })
    }

    /// Return the identifier for `trading_pair`, assigning and storing a new
    /// one if the pair has never been seen.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Write`] if a new identity could not be
    /// stored. No identifier is consumed in that case.
    pub async fn resolve(&self, trading_pair: &str) -> Result<CoinId, IdentityError> {
        if let Some(id) = self.get(trading_pair) {
            return Ok(id);
        }

        let _alloc = self.allocator.lock().await;

        // Another resolver may have won the race while we waited.
        let next_id = {
            let map = self.map.read();
            if let Some(id) = map.get(trading_pair) {
                return Ok(id);
            }
            if map.max_id() == Some(CoinId::new(u32::MAX)) {
                return Err(IdentityError::Exhausted);
            }
            map.next_id()
        };

        let identity = SymbolIdentity::new(trading_pair, next_id);
        self.store
            .insert_identity(&identity)
            .await
            .map_err(|source| IdentityError::Write {
                trading_pair: trading_pair.to_string(),
                source,
            })?;

        let known = {
            let mut map = self.map.write();
            map.insert(identity)?;
            map.len()
        };
        metrics::set_known_identities(known);
        tracing::info!(trading_pair, coin_id = %next_id, "New trading pair registered");

        Ok(next_id)
    }

    /// Cached identifier for `trading_pair`, without touching the store.
    #[must_use]
    pub fn get(&self, trading_pair: &str) -> Option<CoinId> {
        self.map.read().get(trading_pair)
    }

    /// Number of known pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether no pair is known yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
