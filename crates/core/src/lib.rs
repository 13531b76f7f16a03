//! Core types and shared functionality for burrow.
//!
//! This crate provides:
//! - Two-tier response cache (in-memory TTL layer over a SQLite store)
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{CacheDb, CacheEntry, Headers, MemoryCache, StoreConfig};
pub use config::{ConfigError, ProxyConfig};
pub use error::Error;
