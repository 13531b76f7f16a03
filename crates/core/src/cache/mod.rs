//! Two-tier response cache.
//!
//! - [`MemoryCache`]: bounded, time-expiring hot-key table
//! - [`CacheDb`]: SQLite-backed durable store with WAL mode, a startup
//!   integrity pass and batched asynchronous commits through tokio-rusqlite
//!
//! Tiers hold independent copies. Expiry or replacement in one tier is
//! never propagated to the other.

pub mod batch;
pub mod connection;
pub mod entry;
pub mod memory;
pub mod migrations;
pub mod store;

pub use crate::Error;

pub use batch::BatchCounts;
pub use connection::{CacheDb, StoreConfig};
pub use entry::{CacheEntry, Headers, WriteTask};
pub use memory::MemoryCache;
