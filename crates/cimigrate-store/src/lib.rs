//! Ordered key-value storage for contract-info records.
//!
//! [`KvStore`] hands out [`StoreSession`]s; the migration engine gives each
//! worker thread its own session. Two backends are provided: [`MemoryStore`]
//! for tests and in-process data, and [`SqliteStore`] for on-disk databases.

pub mod keys;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use keys::{CONTRACT_INFO_PREFIX, address_from_key, contract_key, prefix_successor};
pub use memory::{MemorySession, MemoryStore};
pub use sqlite::{SqliteSession, SqliteStore};
pub use traits::{KvStore, ScanControl, ScanPage, SessionMetrics, StoreSession};
