//! Accept loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::Instrument;

use crate::handler::ProxyHandler;
use crate::limiter::ConnectionLimiter;

/// Pause after a failed accept, e.g. when file descriptors run out.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until `shutdown` resolves, running each session on
/// its own task under a limiter permit.
///
/// Sessions already running are left alone; use
/// [`ConnectionLimiter::drain`] to wait for them.
pub async fn serve<F>(listener: TcpListener, handler: Arc<ProxyHandler>, limiter: ConnectionLimiter, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    tracing::debug!(max_sessions = limiter.max(), "accepting connections");

    loop {
        let permit = tokio::select! {
            () = &mut shutdown => break,
            permit = limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        let handler = Arc::clone(&handler);
        let span = tracing::info_span!("session", %peer);
        tokio::spawn(
            async move {
                let _permit = permit;
                handler.handle_client(stream, peer).await;
            }
            .instrument(span),
        );
    }

    tracing::info!(in_flight = limiter.in_flight(), "stopped accepting connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use burrow_client::{FetchResponse, Fetcher};
    use burrow_core::{CacheDb, Error, Headers, MemoryCache, StoreConfig};
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    /// Origin that takes a while to answer and records peak concurrency.
    struct SlowFetcher {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchResponse, Error> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(FetchResponse {
                status: 500,
                reason: "Internal Server Error".into(),
                headers: Headers::new(),
                bytes: Bytes::from_static(b"slow"),
                fetch_ms: self.delay.as_millis() as u64,
            })
        }
    }

    async fn handler(delay: Duration) -> (Arc<ProxyHandler>, Arc<SlowFetcher>) {
        let store = Arc::new(CacheDb::open_in_memory(StoreConfig::default()).await.unwrap());
        let memory = Arc::new(MemoryCache::new(NonZeroUsize::new(4).unwrap(), Duration::from_secs(60)));
        let fetcher = Arc::new(SlowFetcher { delay, active: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let handler = Arc::new(ProxyHandler::new(store, memory, fetcher.clone(), Duration::from_secs(1)));
        (handler, fetcher)
    }

    async fn get(addr: std::net::SocketAddr) -> Vec<u8> {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET http://origin.test/ HTTP/1.1\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (handler, _) = handler(Duration::ZERO).await;

        let server = tokio::spawn(serve(listener, handler, ConnectionLimiter::new(4), async {
            let _ = stop_rx.await;
        }));

        let out = get(addr).await;
        assert!(out.starts_with(b"HTTP/1.1 500 Internal Server Error\r\n"));

        stop_tx.send(()).unwrap();
        server.await.unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_limits_concurrent_sessions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (handler, fetcher) = handler(Duration::from_millis(100)).await;

        tokio::spawn(serve(listener, handler, ConnectionLimiter::new(2), std::future::pending()));

        let clients: Vec<_> = (0..6).map(|_| tokio::spawn(get(addr))).collect();
        for client in clients {
            let out = client.await.unwrap();
            assert!(out.ends_with(b"slow"));
        }

        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
    }
}
