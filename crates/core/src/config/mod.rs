//! Proxy configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (BURROW_*)
//! 2. TOML config file (if BURROW_CONFIG_FILE set)
//! 3. Built-in defaults

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::StoreConfig;

mod validation;

pub use validation::ConfigError;

/// Proxy configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (BURROW_*)
/// 2. TOML config file (if BURROW_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Listening port.
    ///
    /// Set via BURROW_PORT environment variable.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to SQLite cache database.
    ///
    /// Set via BURROW_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Seconds a cached response stays servable, in both tiers.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum number of client sessions in flight at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of writes per durable commit.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Longest wait for the first write of a batch, in milliseconds.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Entry capacity of the in-memory tier.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// CONNECT dial timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Total origin fetch timeout in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Redirects the fetch client follows before giving up.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Largest origin body the proxy will buffer.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// User-Agent sent to origins.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// How long shutdown waits for in-flight sessions, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Optional JSON log file written alongside stderr.
    ///
    /// Set via BURROW_LOG_FILE environment variable.
    #[serde(default = "default_log_file")]
    pub log_file: Option<PathBuf>,
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    3142
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cache.db")
}

fn default_cache_ttl_secs() -> u64 {
    2_592_000 // 30 days
}

fn default_max_connections() -> usize {
    100
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_interval_ms() -> u64 {
    1_000
}

fn default_memory_capacity() -> usize {
    1_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_max_redirects() -> usize {
    10
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_user_agent() -> String {
    "burrow/0.1".into()
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("proxy.log"))
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            db_path: default_db_path(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            memory_capacity: default_memory_capacity(),
            connect_timeout_ms: default_connect_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_redirects: default_max_redirects(),
            max_body_bytes: default_max_body_bytes(),
            user_agent: default_user_agent(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            log_file: default_log_file(),
        }
    }
}

impl ProxyConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// In-memory tier capacity, clamped to at least one entry.
    pub fn memory_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Durable store tuning derived from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            ttl: self.cache_ttl(),
            batch_size: self.batch_size,
            batch_interval: Duration::from_millis(self.batch_interval_ms),
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `BURROW_`
    /// 2. TOML file from `BURROW_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("BURROW_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("BURROW_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
