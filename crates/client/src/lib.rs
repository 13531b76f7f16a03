//! Client code for burrow.
//!
//! This crate provides the outbound HTTP fetch used by the proxy on cache
//! misses, behind the [`Fetcher`] trait so sessions can be driven by other
//! implementations in tests.

pub mod fetch;

pub use fetch::{FetchClient, FetchConfig, FetchResponse, Fetcher};
