//! Background batching of durable writes.
//!
//! The worker waits up to the batch interval for a first task, greedily
//! takes whatever else is already queued (up to the batch size) and commits
//! the lot in one transaction. A failed batch is rolled back, logged and
//! dropped; it is never retried or re-queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_rusqlite::{Connection, params};

use super::entry::WriteTask;
use super::store::format_timestamp;
use crate::Error;

/// Counters maintained by the write worker.
#[derive(Debug, Default)]
pub struct BatchStats {
    batches: AtomicU64,
    rows: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`BatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    /// Transactions that committed.
    pub batches: u64,
    /// Rows written by committed transactions.
    pub rows: u64,
    /// Transactions that were rolled back and discarded.
    pub failed: u64,
    /// Tasks refused because the store was shutting down.
    pub dropped: u64,
}

impl BatchStats {
    pub fn snapshot(&self) -> BatchCounts {
        BatchCounts {
            batches: self.batches.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Worker loop. Runs until every sender is gone and the queue is empty.
pub(crate) async fn run_worker(
    conn: Connection, mut rx: UnboundedReceiver<WriteTask>, batch_size: usize, interval: Duration,
    stats: Arc<BatchStats>,
) {
    loop {
        let first = match tokio::time::timeout(interval, rx.recv()).await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(_) => continue,
        };

        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(task) => batch.push(task),
                Err(_) => break,
            }
        }

        let len = batch.len() as u64;
        match commit_batch(&conn, batch).await {
            Ok(()) => {
                stats.batches.fetch_add(1, Ordering::Relaxed);
                stats.rows.fetch_add(len, Ordering::Relaxed);
                tracing::debug!(batch = len, "committed cache batch");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(batch = len, error = %e, "cache batch commit failed, batch dropped");
            }
        }
    }

    tracing::debug!("cache write worker stopped");
}

/// Upsert every task in one transaction, stamping all rows with the same
/// commit time.
async fn commit_batch(conn: &Connection, batch: Vec<WriteTask>) -> Result<(), Error> {
    let timestamp = format_timestamp(Utc::now());
    let rows = batch
        .into_iter()
        .map(|task| {
            let headers = task.headers.to_json()?;
            Ok((task.key, task.content, headers, task.status_code, task.expected_size as i64))
        })
        .collect::<Result<Vec<_>, Error>>()?;

    conn.call(move |conn| -> Result<(), Error> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO cache (url, content, headers, status_code, expected_size, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(url) DO UPDATE SET
                    content = excluded.content,
                    headers = excluded.headers,
                    status_code = excluded.status_code,
                    expected_size = excluded.expected_size,
                    timestamp = excluded.timestamp",
            )?;
            for (url, content, headers, status_code, expected_size) in &rows {
                stmt.execute(params![url, &content[..], headers, status_code, expected_size, &timestamp])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(Error::from)
}
