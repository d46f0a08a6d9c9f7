//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the durable store.

/// Port interfaces for the durable store and dead-letter sink.
pub mod ports;

/// Application services for identity, persistence, ingestion and queries.
pub mod services;
