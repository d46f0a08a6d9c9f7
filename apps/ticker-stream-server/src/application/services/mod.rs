//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SymbolIdentityCache`: trading pair to coin id, durable first
//! - `PersistenceBuffer`: immediate or batched tick writes with retry
//! - `TickIngestor`: decode, identify, store and publish one upstream frame
//! - `QueryService`: historical range queries

pub mod identity_cache;
pub mod ingest;
pub mod persistence_buffer;
pub mod query;

pub use identity_cache::{IdentityError, SymbolIdentityCache};
pub use ingest::{BatchReport, IngestError, TickIngestor};
pub use persistence_buffer::{
    BufferConfig, FlushOutcome, PersistenceBuffer, PersistenceError, PersistenceMode,
};
pub use query::{DEFAULT_QUERY_TIMEOUT, QueryError, QueryService};
