//! Server Configuration Settings
//!
//! Configuration types for the ticker stream server, loaded from
//! environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{BufferConfig, DEFAULT_QUERY_TIMEOUT, PersistenceMode};
use crate::infrastructure::binance::DEFAULT_STREAM_URL;
use crate::infrastructure::broadcast::{BroadcastConfig, LagPolicy};

/// Durable store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// SQLite database file.
    #[default]
    Sqlite,
    /// Process memory; lost on restart.
    Memory,
}

impl StoreBackend {
    /// Configuration spelling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// API port: range queries and the subscriber WebSocket.
    pub api_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_port: 8080,
            health_port: 8082,
        }
    }
}

/// Upstream feed connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Exchange stream URL.
    pub url: String,
    /// Raw frames buffered between the socket reader and ingestion.
    pub ingest_queue_capacity: usize,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            ingest_queue_capacity: 1024,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Backend selection.
    pub backend: StoreBackend,
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            database_path: PathBuf::from("data/ticker.db"),
        }
    }
}

/// Tick persistence settings.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    /// Immediate or buffered writes.
    pub mode: PersistenceMode,
    /// Time between flushes.
    pub flush_interval: Duration,
    /// Pending record cap.
    pub max_pending: usize,
    /// Consecutive failed flushes before dead-lettering.
    pub flush_max_attempts: u32,
    /// Dead-letter file; `None` disables dead-lettering.
    pub dead_letter_path: Option<PathBuf>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            mode: PersistenceMode::Immediate,
            flush_interval: Duration::from_secs(1),
            max_pending: 100_000,
            flush_max_attempts: 5,
            dead_letter_path: Some(PathBuf::from("data/dead-letter.jsonl")),
        }
    }
}

impl PersistenceSettings {
    /// Flush loop tuning derived from these settings.
    #[must_use]
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            flush_interval: self.flush_interval,
            max_pending: self.max_pending,
            max_attempts: self.flush_max_attempts,
            ..BufferConfig::default()
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Frames buffered per subscriber.
    pub capacity: usize,
    /// Slow subscriber handling.
    pub lag_policy: LagPolicy,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            lag_policy: LagPolicy::DropOldest,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            capacity: settings.capacity,
            lag_policy: settings.lag_policy,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream feed settings.
    pub upstream: UpstreamSettings,
    /// Durable store settings.
    pub store: StoreSettings,
    /// Tick persistence settings.
    pub persistence: PersistenceSettings,
    /// Subscriber fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Bound on a single range query.
    pub query_timeout: Duration,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that cannot be
    /// parsed or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            api_port: env.parse("PORT", server_defaults.api_port)?,
            health_port: env.parse("HEALTH_PORT", server_defaults.health_port)?,
        };

        let upstream_defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            url: env.string("UPSTREAM_URL").unwrap_or(upstream_defaults.url),
            ingest_queue_capacity: env.parse(
                "INGEST_QUEUE_CAPACITY",
                upstream_defaults.ingest_queue_capacity,
            )?,
            heartbeat_interval: env.secs(
                "HEARTBEAT_INTERVAL_SECS",
                upstream_defaults.heartbeat_interval,
            )?,
            heartbeat_timeout: env.secs(
                "HEARTBEAT_TIMEOUT_SECS",
                upstream_defaults.heartbeat_timeout,
            )?,
            reconnect_delay_initial: env.millis(
                "RECONNECT_DELAY_INITIAL_MS",
                upstream_defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env.secs(
                "RECONNECT_DELAY_MAX_SECS",
                upstream_defaults.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: env.parse(
                "RECONNECT_DELAY_MULTIPLIER",
                upstream_defaults.reconnect_delay_multiplier,
            )?,
            max_reconnect_attempts: env.parse(
                "MAX_RECONNECT_ATTEMPTS",
                upstream_defaults.max_reconnect_attempts,
            )?,
        };

        let store_defaults = StoreSettings::default();
        let store = StoreSettings {
            backend: env.parse("STORE_BACKEND", store_defaults.backend)?,
            database_path: env
                .string("DATABASE_PATH")
                .map_or(store_defaults.database_path, PathBuf::from),
        };

        let persistence_defaults = PersistenceSettings::default();
        let persistence = PersistenceSettings {
            mode: env.parse("PERSISTENCE_MODE", persistence_defaults.mode)?,
            flush_interval: env.millis("FLUSH_INTERVAL_MS", persistence_defaults.flush_interval)?,
            max_pending: env.parse("MAX_PENDING_RECORDS", persistence_defaults.max_pending)?,
            flush_max_attempts: env.parse(
                "FLUSH_MAX_ATTEMPTS",
                persistence_defaults.flush_max_attempts,
            )?,
            // Set but empty disables dead-lettering.
            dead_letter_path: match lookup("DEAD_LETTER_PATH") {
                Some(path) if path.trim().is_empty() => None,
                Some(path) => Some(PathBuf::from(path.trim())),
                None => persistence_defaults.dead_letter_path,
            },
        };

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            capacity: env.parse("BROADCAST_CAPACITY", broadcast_defaults.capacity)?,
            lag_policy: env.parse("LAG_POLICY", broadcast_defaults.lag_policy)?,
        };

        let query_timeout = env.millis("QUERY_TIMEOUT_MS", DEFAULT_QUERY_TIMEOUT)?;

        let config = Self {
            server,
            upstream,
            store,
            persistence,
            broadcast,
            query_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("INGEST_QUEUE_CAPACITY", self.upstream.ingest_queue_capacity),
            ("BROADCAST_CAPACITY", self.broadcast.capacity),
            ("MAX_PENDING_RECORDS", self.persistence.max_pending),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(key, "0", "must be greater than zero"));
            }
        }

        let multiplier = self.upstream.reconnect_delay_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "RECONNECT_DELAY_MULTIPLIER",
                multiplier.to_string(),
                "must be a finite number >= 1.0",
            ));
        }

        if self.persistence.flush_interval.is_zero() {
            return Err(ConfigError::invalid(
                "FLUSH_INTERVAL_MS",
                "0",
                "must be greater than zero",
            ));
        }

        if self.upstream.heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid(
                "HEARTBEAT_INTERVAL_SECS",
                "0",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable is set to an unusable value.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Variable source with typed accessors. Unset and blank values fall back
/// to the default; anything else must parse.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, raw.clone(), e.to_string())),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse::<u64>(key, default.as_secs())
            .map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse::<u64>(key, default_ms).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server.api_port, 8080);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.upstream.url, DEFAULT_STREAM_URL);
        assert_eq!(config.upstream.ingest_queue_capacity, 1024);
        assert_eq!(config.upstream.reconnect_delay_initial, Duration::from_millis(500));
        assert_eq!(config.upstream.max_reconnect_attempts, 0);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.persistence.mode, PersistenceMode::Immediate);
        assert_eq!(config.persistence.flush_interval, Duration::from_secs(1));
        assert_eq!(
            config.persistence.dead_letter_path,
            Some(PathBuf::from("data/dead-letter.jsonl"))
        );
        assert_eq!(config.broadcast.capacity, 256);
        assert_eq!(config.broadcast.lag_policy, LagPolicy::DropOldest);
        assert_eq!(config.query_timeout, Duration::from_secs(10));
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("UPSTREAM_URL", "ws://localhost:1234/ws"),
            ("RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("STORE_BACKEND", "memory"),
            ("PERSISTENCE_MODE", "Buffered"),
            ("FLUSH_INTERVAL_MS", "250"),
            ("LAG_POLICY", "disconnect"),
            ("QUERY_TIMEOUT_MS", "1500"),
        ])
        .unwrap();

        assert_eq!(config.server.api_port, 9000);
        assert_eq!(config.upstream.url, "ws://localhost:1234/ws");
        assert!((config.upstream.reconnect_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.persistence.mode, PersistenceMode::Buffered);
        assert_eq!(config.persistence.buffer_config().flush_interval, Duration::from_millis(250));
        assert_eq!(config.broadcast.lag_policy, LagPolicy::Disconnect);
        assert_eq!(config.query_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn empty_dead_letter_path_disables_it() {
        let config = config_from(&[("DEAD_LETTER_PATH", "")]).unwrap();
        assert_eq!(config.persistence.dead_letter_path, None);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("PORT", "  "), ("LAG_POLICY", "")]).unwrap();
        assert_eq!(config.server.api_port, 8080);
        assert_eq!(config.broadcast.lag_policy, LagPolicy::DropOldest);
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let err = config_from(&[("PERSISTENCE_MODE", "eventually")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PERSISTENCE_MODE"));
    }

    #[test]
    fn unparsable_number_is_rejected() {
        let err = config_from(&[("HEALTH_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "HEALTH_PORT"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(config_from(&[("INGEST_QUEUE_CAPACITY", "0")]).is_err());
        assert!(config_from(&[("BROADCAST_CAPACITY", "0")]).is_err());
    }

    #[test]
    fn shrinking_multiplier_is_rejected() {
        assert!(config_from(&[("RECONNECT_DELAY_MULTIPLIER", "0.5")]).is_err());
    }

    #[test]
    fn store_backend_parsing() {
        assert_eq!("SQLITE".parse::<StoreBackend>(), Ok(StoreBackend::Sqlite));
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("postgres".parse::<StoreBackend>().is_err());
    }
}
