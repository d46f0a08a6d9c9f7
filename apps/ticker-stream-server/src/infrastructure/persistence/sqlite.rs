//! SQLite Store
//!
//! Durable identity table and tick time series on a single SQLite file.
//!
//! - WAL mode so range queries can read while ingestion writes
//! - One transaction per `insert_ticks` call (all or nothing)
//! - Timestamps stored as epoch milliseconds, decimals as exact text
//! - Blocking SQLite calls run on tokio's blocking pool

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Row, params};
use rust_decimal::Decimal;

use crate::application::ports::{IdentityStore, StoreError, TickStore};
use crate::domain::identity::SymbolIdentity;
use crate::domain::tick::{CoinId, TickRecord, TimeRange};

const SCHEMA_SQL: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS coins (
    coin_id INTEGER PRIMARY KEY,
    trading_pair TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS tickers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    coin_id INTEGER NOT NULL,
    trading_pair TEXT NOT NULL,
    event_timestamp INTEGER NOT NULL,
    current_price TEXT NOT NULL,
    opening_price TEXT NOT NULL,
    highest_price_24h TEXT NOT NULL,
    lowest_price_24h TEXT NOT NULL,
    total_traded_volume TEXT NOT NULL,
    total_traded_quote_volume TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tickers_coin_time
    ON tickers(coin_id, event_timestamp);
";

const INSERT_TICK_SQL: &str = "INSERT INTO tickers
     (coin_id, trading_pair, event_timestamp, current_price, opening_price,
      highest_price_24h, lowest_price_24h, total_traded_volume, total_traded_quote_volume)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const SELECT_TICKS_SQL: &str = "SELECT coin_id, trading_pair, event_timestamp, current_price,
            opening_price, highest_price_24h, lowest_price_24h,
            total_traded_volume, total_traded_quote_volume
     FROM tickers
     WHERE coin_id = ?1 AND event_timestamp BETWEEN ?2 AND ?3
     ORDER BY event_timestamp, id";

/// SQLite-backed identity and tick store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file cannot be opened or
    /// the schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("create {}: {e}", parent.display()))
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", path.display())))?;

        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "SQLite store opened");
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if `SQLite` cannot be initialized.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StoreError::Unavailable(format!("schema: {e}")))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::debug!(journal_mode = %journal_mode, "WAL mode not active");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
        .map_err(map_sqlite_error)
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(err.to_string())
        }
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
            StoreError::Corrupt(err.to_string())
        }
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::CannotOpen | ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn tick_from_row(row: &Row<'_>) -> rusqlite::Result<TickRecord> {
    let millis: i64 = row.get(2)?;
    let event_timestamp = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })?;

    Ok(TickRecord {
        coin_id: CoinId::new(row.get(0)?),
        trading_pair: row.get(1)?,
        event_timestamp,
        current_price: decimal_column(row, 3)?,
        opening_price: decimal_column(row, 4)?,
        highest_price_24h: decimal_column(row, 5)?,
        lowest_price_24h: decimal_column(row, 6)?,
        total_traded_volume: decimal_column(row, 7)?,
        total_traded_quote_volume: decimal_column(row, 8)?,
    })
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn load_identities(&self) -> Result<Vec<SymbolIdentity>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT trading_pair, coin_id FROM coins ORDER BY coin_id")?;
            let rows = stmt.query_map([], |row| {
                Ok(SymbolIdentity::new(
                    row.get::<_, String>(0)?,
                    CoinId::new(row.get(1)?),
                ))
            })?;
            let identities = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(identities)
        })
        .await
    }

    async fn insert_identity(&self, identity: &SymbolIdentity) -> Result<(), StoreError> {
        let identity = identity.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO coins (coin_id, trading_pair) VALUES (?1, ?2)",
                params![identity.coin_id.value(), identity.trading_pair],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_identity(&self, trading_pair: &str) -> Result<Option<CoinId>, StoreError> {
        let trading_pair = trading_pair.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached("SELECT coin_id FROM coins WHERE trading_pair = ?1")?;
            let coin_id = stmt
                .query_row(params![trading_pair], |row| row.get::<_, u32>(0))
                .optional()?;
            Ok(coin_id.map(CoinId::new))
        })
        .await
    }
}

#[async_trait]
impl TickStore for SqliteStore {
    async fn insert_ticks(&self, records: &[TickRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let records = records.to_vec();
        let inserted = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare_cached(INSERT_TICK_SQL)?;
                    for record in &records {
                        stmt.execute(params![
                            record.coin_id.value(),
                            record.trading_pair,
                            record.event_timestamp.timestamp_millis(),
                            record.current_price.to_string(),
                            record.opening_price.to_string(),
                            record.highest_price_24h.to_string(),
                            record.lowest_price_24h.to_string(),
                            record.total_traded_volume.to_string(),
                            record.total_traded_quote_volume.to_string(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(records.len())
            })
            .await?;

        tracing::debug!(inserted, "Batch inserted ticks");
        Ok(inserted)
    }

    async fn find_ticks(
        &self,
        coin_id: CoinId,
        range: &TimeRange,
    ) -> Result<Vec<TickRecord>, StoreError> {
        // Stored times are whole milliseconds: round the lower bound up.
        let start = range.start.timestamp_millis()
            + i64::from(range.start.timestamp_subsec_nanos() % 1_000_000 != 0);
        let end = range.end.timestamp_millis();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(SELECT_TICKS_SQL)?;
            let rows = stmt.query_map(params![coin_id.value(), start, end], tick_from_row)?;
            let ticks = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(ticks)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn tick(coin: u32, pair: &str, millis: i64, price: &str) -> TickRecord {
        let price = Decimal::from_str(price).unwrap();
        TickRecord {
            coin_id: CoinId::new(coin),
            trading_pair: pair.to_string(),
            event_timestamp: at(millis),
            current_price: price,
            opening_price: price,
            highest_price_24h: price,
            lowest_price_24h: price,
            total_traded_volume: Decimal::from_str("1.50000000").unwrap(),
            total_traded_quote_volume: Decimal::from_str("0.00000001").unwrap(),
        }
    }

    #[tokio::test]
    async fn identities_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ticker.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_identity(&SymbolIdentity::new("BTCUSDT", CoinId::new(1)))
                .await
                .unwrap();
            store
                .insert_identity(&SymbolIdentity::new("ETHUSDT", CoinId::new(2)))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let identities = reopened.load_identities().await.unwrap();
        assert_eq!(
            identities,
            vec![
                SymbolIdentity::new("BTCUSDT", CoinId::new(1)),
                SymbolIdentity::new("ETHUSDT", CoinId::new(2)),
            ]
        );
        assert_eq!(
            reopened.find_identity("ETHUSDT").await.unwrap(),
            Some(CoinId::new(2))
        );
        assert_eq!(reopened.find_identity("ethusdt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_identity_is_a_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_identity(&SymbolIdentity::new("BTCUSDT", CoinId::new(1)))
            .await
            .unwrap();

        let same_pair = store
            .insert_identity(&SymbolIdentity::new("BTCUSDT", CoinId::new(2)))
            .await;
        let same_id = store
            .insert_identity(&SymbolIdentity::new("ETHUSDT", CoinId::new(1)))
            .await;

        assert!(matches!(same_pair, Err(StoreError::Conflict(_))));
        assert!(matches!(same_id, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn range_query_is_inclusive_and_ordered() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_ticks(&[
                tick(1, "BTCUSDT", 3_000, "3"),
                tick(1, "BTCUSDT", 1_000, "1"),
                tick(2, "ETHUSDT", 2_000, "20"),
                tick(1, "BTCUSDT", 2_000, "2"),
                tick(1, "BTCUSDT", 4_000, "4"),
            ])
            .await
            .unwrap();

        let found = store
            .find_ticks(CoinId::new(1), &TimeRange::new(at(1_000), at(3_000)))
            .await
            .unwrap();
        let prices: Vec<_> = found.iter().map(|t| t.current_price.to_string()).collect();
        assert_eq!(prices, vec!["1", "2", "3"]);
        assert!(found.iter().all(|t| t.coin_id == CoinId::new(1)));
    }

    #[tokio::test]
    async fn sub_millisecond_bounds_stay_inclusive() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_ticks(&[
                tick(1, "BTCUSDT", 1_000, "1"),
                tick(1, "BTCUSDT", 2_000, "2"),
            ])
            .await
            .unwrap();

        let half_ms = chrono::Duration::microseconds(500);
        let found = store
            .find_ticks(
                CoinId::new(1),
                &TimeRange::new(at(1_000) + half_ms, at(2_000) + half_ms),
            )
            .await
            .unwrap();
        let prices: Vec<_> = found.iter().map(|t| t.current_price.to_string()).collect();
        assert_eq!(prices, vec!["2"]);

        let before = store
            .find_ticks(
                CoinId::new(1),
                &TimeRange::new(at(2_000) + half_ms, at(3_000)),
            )
            .await
            .unwrap();
        assert!(before.is_empty());
    }

    #[tokio::test]
    async fn decimals_keep_their_scale() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original = tick(1, "BTCUSDT", 1_000, "42150.01000000");
        store.insert_ticks(&[original.clone()]).await.unwrap();

        let found = store
            .find_ticks(CoinId::new(1), &TimeRange::new(at(0), at(5_000)))
            .await
            .unwrap();
        assert_eq!(found, vec![original]);
        assert_eq!(found[0].current_price.to_string(), "42150.01000000");
    }

    #[tokio::test]
    async fn reversed_range_finds_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_ticks(&[tick(1, "BTCUSDT", 2_000, "2")])
            .await
            .unwrap();

        let found = store
            .find_ticks(CoinId::new(1), &TimeRange::new(at(3_000), at(1_000)))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn empty_insert_is_noop() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.insert_ticks(&[]).await.unwrap(), 0);
    }
}
