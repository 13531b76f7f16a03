//! Read, enqueue and lifecycle operations on the durable store.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::batch::BatchCounts;
use super::connection::CacheDb;
use super::entry::{CacheEntry, Headers, WriteTask};
use crate::Error;

/// Timestamps are stored as fixed-width RFC 3339 text so that SQL string
/// comparison orders them chronologically.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

struct StoredRow {
    content: Option<Vec<u8>>,
    headers: Option<String>,
    status_code: i64,
    expected_size: Option<i64>,
    timestamp: String,
}

impl StoredRow {
    fn into_entry(self, key: String) -> Result<CacheEntry, Error> {
        let corrupt = |reason: String| Error::CorruptRow { url: key.clone(), reason };

        let headers = match self.headers.as_deref() {
            Some(json) => Headers::from_json(json).map_err(|e| corrupt(e.to_string()))?,
            None => Headers::new(),
        };
        let status_code = u16::try_from(self.status_code).map_err(|e| corrupt(e.to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);
        let content = Bytes::from(self.content.unwrap_or_default());
        let expected_size = match self.expected_size {
            Some(size) => u64::try_from(size).map_err(|e| corrupt(e.to_string()))?,
            None => content.len() as u64,
        };

        Ok(CacheEntry { key, content, headers, status_code, expected_size, timestamp })
    }
}

impl CacheDb {
    /// Get a live entry by URL.
    ///
    /// Returns None if the URL was never committed or its row is older than
    /// the TTL. Expired rows stay on disk until overwritten.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        self.get_at(key, Utc::now()).await
    }

    pub(crate) async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, Error> {
        let ttl = TimeDelta::from_std(self.config.ttl).unwrap_or(TimeDelta::MAX);
        let cutoff = format_timestamp(now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC));
        let key = key.to_string();

        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let mut stmt = conn.prepare_cached(
                    "SELECT content, headers, status_code, expected_size, timestamp
                     FROM cache WHERE url = ?1 AND timestamp > ?2",
                )?;

                let result = stmt.query_row(params![key, cutoff], |row| {
                    Ok(StoredRow {
                        content: row.get(0)?,
                        headers: row.get(1)?,
                        status_code: row.get(2)?,
                        expected_size: row.get(3)?,
                        timestamp: row.get(4)?,
                    })
                });

                match result {
                    Ok(row) => row.into_entry(key).map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Queue a response for the next batch commit.
    ///
    /// Never waits on storage. Once [`CacheDb::shutdown`] has started the
    /// task is dropped with a warning.
    pub fn enqueue_write(&self, key: impl Into<String>, content: Bytes, headers: Headers, status_code: u16) {
        let task = WriteTask::new(key, content, headers, status_code);
        let queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let refused = match queue.as_ref() {
            Some(tx) => tx.send(task).err().map(|e| e.0),
            None => Some(task),
        };

        if let Some(task) = refused {
            self.stats.record_dropped();
            tracing::warn!(url = %task.key, "cache store is shutting down, write dropped");
        }
    }

    /// Total bytes of stored content, expired rows included.
    pub async fn total_cached_bytes(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let total: i64 =
                    conn.query_row("SELECT COALESCE(SUM(LENGTH(content)), 0) FROM cache", [], |row| row.get(0))?;
                Ok(total.max(0) as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Counters from the batching worker.
    pub fn batch_stats(&self) -> BatchCounts {
        self.stats.snapshot()
    }

    /// Commit everything already queued, stop the worker and close the
    /// connection.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), Error> {
        drop(self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take());

        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "cache write worker ended abnormally");
        }

        self.conn.clone().close().await.map_err(Error::from)?;
        tracing::info!(stats = ?self.stats.snapshot(), "cache store closed");
        Ok(())
    }
}
