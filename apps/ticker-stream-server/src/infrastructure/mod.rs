//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the network surfaces.

/// Binance upstream feed client.
pub mod binance;

/// Subscriber frame compression.
pub mod codec;

/// Subscriber fan-out.
pub mod broadcast;

/// Durable store adapters.
pub mod persistence;

/// Public HTTP API: range queries and the subscriber WebSocket.
pub mod http;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
