//! Per-connection session handling.
//!
//! A session reads one request head, then either tunnels (CONNECT), serves
//! a GET from cache or origin, or rejects the request. The connection is
//! closed afterwards; there is no keep-alive.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use burrow_client::Fetcher;
use burrow_core::{CacheDb, CacheEntry, MemoryCache};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::pipeline::fetch_and_forward;
use crate::request::{Route, read_request_head};
use crate::response::{CONNECT_ESTABLISHED, frame_headers, reason_phrase, write_error, write_response};
use crate::tunnel;

/// Shared state every session runs against.
pub struct ProxyHandler {
    store: Arc<CacheDb>,
    memory: Arc<MemoryCache>,
    fetcher: Arc<dyn Fetcher>,
    connect_timeout: Duration,
}

impl ProxyHandler {
    pub fn new(
        store: Arc<CacheDb>, memory: Arc<MemoryCache>, fetcher: Arc<dyn Fetcher>, connect_timeout: Duration,
    ) -> Self {
        Self { store, memory, fetcher, connect_timeout }
    }

    /// Run a session over an accepted socket.
    pub async fn handle_client(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        self.handle_connection(BufReader::new(read_half), write_half).await;
    }

    /// Run a session over any byte stream.
    pub async fn handle_connection<R, W>(&self, mut reader: R, mut writer: W)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let head = match read_request_head(&mut reader).await {
            Ok(Some(head)) => head,
            Ok(None) => {
                tracing::debug!("client closed before sending a request");
                return;
            }
            Err(e) => return reject(&mut writer, &e).await,
        };

        tracing::debug!(method = %head.method, target = %head.target, version = %head.version, "request");

        match head.route() {
            Ok(Route::Tunnel { authority }) => self.tunnel(&authority, reader, writer).await,
            Ok(Route::Fetch { url }) => {
                if let Err(e) = self.serve_get(&url, &mut writer).await {
                    return reject(&mut writer, &e).await;
                }
                let _ = writer.shutdown().await;
            }
            Err(e) => reject(&mut writer, &e).await,
        }
    }

    /// Memory tier first, then the durable tier. A durable hit is not
    /// promoted into memory. Read failures count as misses.
    async fn lookup(&self, url: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(url).await {
            tracing::info!(url, tier = "memory", "cache hit");
            return Some(entry);
        }
        match self.store.get(url).await {
            Ok(Some(entry)) => {
                tracing::info!(url, tier = "durable", "cache hit");
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(url, error = %e, "durable cache read failed");
                None
            }
        }
    }

    async fn serve_get<W>(&self, url: &str, writer: &mut W) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        if let Some(entry) = self.lookup(url).await {
            let CacheEntry { content, mut headers, status_code, .. } = entry;
            frame_headers(&mut headers, content.len());
            write_response(writer, status_code, reason_phrase(status_code), &headers, &content).await?;
            return Ok(());
        }

        tracing::info!(url, "cache miss");
        fetch_and_forward(self.fetcher.as_ref(), &self.memory, &self.store, url, writer).await
    }

    async fn tunnel<R, W>(&self, authority: &str, reader: R, mut writer: W)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let target = match tunnel::dial(authority, self.connect_timeout).await {
            Ok(target) => target,
            Err(e) => return reject(&mut writer, &e).await,
        };
        if let Err(e) = target.set_nodelay(true) {
            tracing::debug!(authority, error = %e, "could not set TCP_NODELAY on target");
        }

        if let Err(e) = writer.write_all(CONNECT_ESTABLISHED).await {
            tracing::debug!(authority, error = %e, "client went away before tunnel start");
            return;
        }
        if let Err(e) = writer.flush().await {
            tracing::debug!(authority, error = %e, "client went away before tunnel start");
            return;
        }

        tracing::info!(authority, "tunnel established");
        let end = tunnel::relay((reader, writer), target.into_split()).await;
        tracing::info!(authority, ?end, "tunnel closed");
    }
}

async fn reject<W>(writer: &mut W, err: &ProxyError)
where
    W: AsyncWrite + Unpin,
{
    match err.status() {
        Some((status, _)) => tracing::warn!(status, error = %err, "request rejected"),
        None => tracing::debug!(error = %err, "session aborted"),
    }
    if let Err(e) = write_error(writer, err).await {
        tracing::debug!(error = %e, "could not deliver error response");
    }
    let _ = writer.shutdown().await;
}
