//! burrow entry point.
//!
//! Boots the caching forward proxy: loads configuration, opens the durable
//! cache, and serves client connections until Ctrl-C or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use burrow_client::{FetchClient, FetchConfig};
use burrow_core::{CacheDb, MemoryCache, ProxyConfig};
use tokio::net::TcpListener;
use tokio::signal;

mod error;
mod handler;
mod limiter;
mod logging;
mod pipeline;
mod request;
mod response;
mod server;
mod tunnel;

use handler::ProxyHandler;
use limiter::ConnectionLimiter;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ProxyConfig::load().context("failed to load configuration")?;
    logging::init(config.log_file.as_deref())?;

    tracing::info!(
        addr = %config.listen_addr(),
        db = %config.db_path.display(),
        max_connections = config.max_connections,
        "starting burrow"
    );

    let store = Arc::new(
        CacheDb::open(&config.db_path, config.store_config())
            .await
            .with_context(|| format!("failed to open cache database {}", config.db_path.display()))?,
    );
    match store.total_cached_bytes().await {
        Ok(bytes) => tracing::info!(bytes, "durable cache ready"),
        Err(e) => tracing::warn!(error = %e, "could not size durable cache"),
    }

    let memory = Arc::new(MemoryCache::new(config.memory_capacity(), config.cache_ttl()));
    let fetcher = FetchClient::new(FetchConfig {
        user_agent: config.user_agent.clone(),
        max_bytes: config.max_body_bytes,
        timeout: config.fetch_timeout(),
        max_redirects: config.max_redirects,
    })
    .context("failed to build fetch client")?;
    tracing::info!(
        memory_capacity = memory.capacity(),
        fetch_timeout_ms = fetcher.config().timeout.as_millis() as u64,
        max_body_bytes = fetcher.config().max_bytes,
        "cache tiers and fetch client ready"
    );

    let handler =
        Arc::new(ProxyHandler::new(Arc::clone(&store), memory, Arc::new(fetcher), config.connect_timeout()));
    let limiter = ConnectionLimiter::new(config.max_connections);

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
    tracing::info!(addr = %listener.local_addr()?, "proxy listening");

    server::serve(listener, handler, limiter.clone(), shutdown_signal()).await;

    if !limiter.drain(config.shutdown_grace()).await {
        tracing::warn!(
            in_flight = limiter.in_flight(),
            grace_ms = config.shutdown_grace_ms,
            "sessions still running after grace period"
        );
    }

    store.shutdown().await.context("failed to flush durable cache")?;
    tracing::info!("burrow stopped");

    Ok(())
}
