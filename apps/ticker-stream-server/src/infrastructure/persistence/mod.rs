//! Persistence Adapters
//!
//! Implementations of the store ports:
//!
//! - [`SqliteStore`]: durable identity table and tick series
//! - [`InMemoryStore`]: volatile store with the same contract
//! - [`JsonlDeadLetter`]: append-only file for records a flush gave up on

mod dead_letter;
mod in_memory;
mod sqlite;

pub use dead_letter::JsonlDeadLetter;
pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
