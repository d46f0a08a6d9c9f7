//! Domain Layer - Core ticker types and business rules.
//!
//! Pure types with no I/O: ticks, symbol identities, range-query validation
//! and upstream feed state.

/// Tick records, identifiers and time ranges.
pub mod tick;

/// Trading pair to identifier mapping.
pub mod identity;

/// Range query requests and validation.
pub mod search;

/// Upstream feed connection state.
pub mod streaming;
