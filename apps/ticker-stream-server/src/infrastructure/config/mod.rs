//! Configuration Module
//!
//! Configuration loading for the ticker stream server.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, PersistenceSettings, ServerConfig, ServerSettings,
    StoreBackend, StoreSettings, UpstreamSettings,
};
