//! Cache-miss path: fetch from origin, forward, then populate both tiers.

use burrow_client::{FetchResponse, Fetcher};
use burrow_core::{CacheDb, CacheEntry, MemoryCache};
use chrono::Utc;
use tokio::io::AsyncWrite;

use crate::error::ProxyError;
use crate::response::{frame_headers, write_response};

/// Only complete successful responses are cached.
const CACHEABLE_STATUS: u16 = 200;

/// Fetch `url`, write the origin's response to `writer`, and cache it when
/// the status is 200.
///
/// The client is answered before the durable write is queued; the memory
/// tier is populated immediately, the durable tier by the write batcher.
pub async fn fetch_and_forward<W>(
    fetcher: &dyn Fetcher, memory: &MemoryCache, store: &CacheDb, url: &str, writer: &mut W,
) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let FetchResponse { status, reason, mut headers, bytes, fetch_ms } = fetcher.fetch(url).await?;

    frame_headers(&mut headers, bytes.len());
    write_response(writer, status, &reason, &headers, &bytes).await?;

    tracing::info!(url, status, bytes = bytes.len(), fetch_ms, "served from origin");

    if status == CACHEABLE_STATUS {
        let entry = CacheEntry {
            key: url.to_string(),
            content: bytes.clone(),
            headers: headers.clone(),
            status_code: status,
            expected_size: bytes.len() as u64,
            timestamp: Utc::now(),
        };
        memory.set(url, entry).await;
        store.enqueue_write(url, bytes, headers, status);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use burrow_core::{Error, Headers, StoreConfig};
    use bytes::Bytes;

    struct CannedFetcher {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static [u8],
    }

    #[async_trait::async_trait]
    impl Fetcher for CannedFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchResponse, Error> {
            Ok(FetchResponse {
                status: self.status,
                reason: crate::response::reason_phrase(self.status).to_string(),
                headers: self.headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                bytes: Bytes::from_static(self.body),
                fetch_ms: 1,
            })
        }
    }

    struct FailingFetcher;

    #[async_trait::async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchResponse, Error> {
            Err(Error::HttpError(format!("network error: {url} unreachable")))
        }
    }

    fn quick_store() -> StoreConfig {
        StoreConfig { batch_size: 1, batch_interval: Duration::from_millis(20), ..Default::default() }
    }

    fn memory() -> MemoryCache {
        MemoryCache::new(NonZeroUsize::new(8).unwrap(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_success_is_forwarded_and_cached() {
        let fetcher = CannedFetcher {
            status: 200,
            headers: vec![("Content-Type", "text/plain"), ("Transfer-Encoding", "chunked")],
            body: b"payload",
        };
        let memory = memory();
        let store = CacheDb::open_in_memory(quick_store()).await.unwrap();
        let mut out = Vec::new();

        fetch_and_forward(&fetcher, &memory, &store, "http://a/x", &mut out).await.unwrap();

        assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 7\r\n\r\npayload");

        let cached = memory.get("http://a/x").await.unwrap();
        assert_eq!(cached.content, Bytes::from_static(b"payload"));
        assert_eq!(cached.headers.get("content-length"), Some("7"));

        store.shutdown().await.unwrap();
        assert_eq!(store.batch_stats().rows, 1);
    }

    #[tokio::test]
    async fn test_non_200_is_forwarded_not_cached() {
        let fetcher = CannedFetcher { status: 404, headers: vec![("Content-Length", "4")], body: b"gone" };
        let memory = memory();
        let store = CacheDb::open_in_memory(quick_store()).await.unwrap();
        let mut out = Vec::new();

        fetch_and_forward(&fetcher, &memory, &store, "http://a/missing", &mut out).await.unwrap();

        assert!(out.starts_with(b"HTTP/1.1 404 Not Found\r\n"));
        assert!(out.ends_with(b"\r\n\r\ngone"));
        assert!(memory.get("http://a/missing").await.is_none());

        store.shutdown().await.unwrap();
        assert_eq!(store.batch_stats().rows, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_writes_nothing() {
        let memory = memory();
        let store = CacheDb::open_in_memory(quick_store()).await.unwrap();
        let mut out = Vec::new();

        let result = fetch_and_forward(&FailingFetcher, &memory, &store, "http://a/", &mut out).await;

        assert!(matches!(result, Err(ProxyError::Upstream(Error::HttpError(_)))));
        assert!(out.is_empty());
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_body_is_cacheable() {
        let fetcher = CannedFetcher { status: 200, headers: vec![], body: b"" };
        let memory = memory();
        let store = CacheDb::open_in_memory(quick_store()).await.unwrap();
        let mut out = Vec::new();

        fetch_and_forward(&fetcher, &memory, &store, "http://a/empty", &mut out).await.unwrap();

        assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let headers: Headers = memory.get("http://a/empty").await.unwrap().headers;
        assert_eq!(headers.get("Content-Length"), Some("0"));
        store.shutdown().await.unwrap();
    }
}
