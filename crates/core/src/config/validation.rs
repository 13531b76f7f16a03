//! Configuration validation rules.
//!
//! This module provides validation logic for `ProxyConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::ProxyConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl ProxyConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `port`, `cache_ttl_secs`, `max_connections`, `batch_size`,
    ///   `memory_capacity` or `max_body_bytes` is 0
    /// - `batch_interval_ms` is less than 10ms
    /// - `connect_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(invalid("port", "must be greater than 0"));
        }
        if self.cache_ttl_secs == 0 {
            return Err(invalid("cache_ttl_secs", "must be greater than 0"));
        }
        if self.max_connections == 0 {
            return Err(invalid("max_connections", "must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be greater than 0"));
        }
        if self.batch_interval_ms < 10 {
            return Err(invalid("batch_interval_ms", "must be at least 10ms"));
        }
        if self.memory_capacity == 0 {
            return Err(invalid("memory_capacity", "must be greater than 0"));
        }

        if self.connect_timeout_ms < 100 {
            return Err(invalid("connect_timeout_ms", "must be at least 100ms"));
        }
        if self.connect_timeout_ms > 300_000 {
            return Err(invalid("connect_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_body_bytes == 0 {
            return Err(invalid("max_body_bytes", "must be greater than 0"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.fetch_timeout_ms < self.connect_timeout_ms {
            tracing::warn!(
                fetch_timeout_ms = self.fetch_timeout_ms,
                connect_timeout_ms = self.connect_timeout_ms,
                "fetch timeout is shorter than the CONNECT dial timeout"
            );
        }

        Ok(())
    }
}
