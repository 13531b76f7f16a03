//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), running migrations, verifying
//! stored rows and starting the background write worker.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rusqlite::{Connection, params};

use super::batch::{self, BatchStats};
use super::entry::WriteTask;
use super::migrations;
use crate::Error;

/// Tuning for the durable store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a committed row stays readable.
    pub ttl: Duration,
    /// Maximum number of writes committed in one transaction.
    pub batch_size: usize,
    /// How long the worker waits for the first write of a batch.
    pub batch_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(2_592_000), batch_size: 10, batch_interval: Duration::from_secs(1) }
    }
}

/// Durable cache handle.
///
/// Wraps a tokio-rusqlite Connection that runs every database operation on
/// one background thread, so reads and batch commits never interleave.
/// Mutations only go through [`CacheDb::enqueue_write`].
#[derive(Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
    pub(crate) config: StoreConfig,
    pub(crate) queue: Mutex<Option<mpsc::UnboundedSender<WriteTask>>>,
    pub(crate) worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    pub(crate) stats: Arc<BatchStats>,
}

impl CacheDb {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// runs pending migrations and the integrity pass, then starts the
    /// batching worker.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IntegrityCheckFailed`] when SQLite reports the
    /// file itself as damaged. The store must not be served in that state.
    pub async fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::initialize(conn, config).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory(config: StoreConfig) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::initialize(conn, config).await
    }

    async fn initialize(conn: Connection, config: StoreConfig) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA temp_store=MEMORY;",
            )?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;
        verify_integrity(&conn).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(BatchStats::default());
        let worker = tokio::spawn(batch::run_worker(
            conn.clone(),
            rx,
            config.batch_size.max(1),
            config.batch_interval,
            Arc::clone(&stats),
        ));

        Ok(Self {
            conn,
            config,
            queue: Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            stats,
        })
    }

    /// Re-run the integrity pass against the open store.
    ///
    /// Returns the URLs of rows that were deleted.
    pub async fn verify_integrity(&self) -> Result<Vec<String>, Error> {
        verify_integrity(&self.conn).await
    }
}

/// Whole-file check followed by per-row size verification.
///
/// Rows whose stored content length differs from `expected_size` are left
/// over from interrupted writes and are deleted.
async fn verify_integrity(conn: &Connection) -> Result<Vec<String>, Error> {
    let removed = conn
        .call(|conn| -> Result<Vec<String>, Error> {
            let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            if verdict != "ok" {
                return Err(Error::IntegrityCheckFailed(verdict));
            }

            let tx = conn.transaction()?;
            let corrupted: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT url FROM cache
                     WHERE expected_size IS NOT NULL
                     AND LENGTH(content) IS NOT expected_size",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<_, _>>()?
            };
            for url in &corrupted {
                tx.execute("DELETE FROM cache WHERE url = ?1", params![url])?;
            }
            tx.commit()?;

            Ok(corrupted)
        })
        .await
        .map_err(Error::from)?;

    for url in &removed {
        tracing::warn!(%url, "removed corrupted cache entry");
    }
    if !removed.is_empty() {
        tracing::info!(count = removed.len(), "cache integrity pass removed entries");
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("burrow-{name}-{}-{nanos}.db", std::process::id()))
    }

    fn cleanup(path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    async fn seed_row(db: &CacheDb, url: &'static str, content: &'static [u8], expected_size: i64) {
        db.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO cache (url, content, headers, status_code, expected_size, timestamp)
                     VALUES (?1, ?2, '[]', 200, ?3, '2099-01-01T00:00:00.000Z')",
                    params![url, content, expected_size],
                )
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = CacheDb::open_in_memory(StoreConfig::default()).await.unwrap();
        let version = db
            .conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert!(!version.is_empty());
        db.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_integrity_removes_size_mismatches() {
        let db = CacheDb::open_in_memory(StoreConfig::default()).await.unwrap();
        seed_row(&db, "http://example.com/ok", b"hello", 5).await;
        seed_row(&db, "http://example.com/short", b"hel", 5).await;
        seed_row(&db, "http://example.com/long", b"hello world", 5).await;

        let mut removed = db.verify_integrity().await.unwrap();
        removed.sort();
        assert_eq!(removed, vec!["http://example.com/long", "http://example.com/short"]);

        assert!(db.get("http://example.com/ok").await.unwrap().is_some());
        assert!(db.get("http://example.com/short").await.unwrap().is_none());
        assert!(db.get("http://example.com/long").await.unwrap().is_none());
        db.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_heals_corrupt_rows() {
        let path = temp_db_path("heal");
        {
            let db = CacheDb::open(&path, StoreConfig::default()).await.unwrap();
            seed_row(&db, "http://example.com/intact", b"abcd", 4).await;
            seed_row(&db, "http://example.com/torn", b"ab", 4).await;
            db.shutdown().await.unwrap();
        }

        let db = CacheDb::open(&path, StoreConfig::default()).await.unwrap();
        assert!(db.get("http://example.com/intact").await.unwrap().is_some());
        assert!(db.get("http://example.com/torn").await.unwrap().is_none());
        let rows: i64 = db
            .conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(rows, 1);
        db.shutdown().await.unwrap();
        cleanup(&path);
    }

    /// Overwrite the start of the cell pointer area of `pages` with 0xFF.
    fn scribble_pages(path: &Path, page_size: u64, pages: &[u64]) {
        use std::io::{Seek, SeekFrom, Write};

        let mut file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        for page in pages {
            file.seek(SeekFrom::Start((page - 1) * page_size + 8)).unwrap();
            file.write_all(&[0xFF; 32]).unwrap();
        }
        file.sync_all().unwrap();
    }

    #[tokio::test]
    async fn test_open_refuses_damaged_file() {
        let path = temp_db_path("damaged");
        let page_size = {
            let db = CacheDb::open(&path, StoreConfig::default()).await.unwrap();
            db.conn
                .call(|conn| {
                    let tx = conn.transaction()?;
                    for i in 0..300 {
                        tx.execute(
                            "INSERT INTO cache (url, content, headers, status_code, expected_size, timestamp)
                             VALUES (?1, ?2, '[]', 200, 2000, '2099-01-01T00:00:00.000Z')",
                            params![format!("http://example.com/{i}"), vec![b'x'; 2000]],
                        )?;
                    }
                    tx.commit()
                })
                .await
                .unwrap();
            let page_size: i64 = db
                .conn
                .call(|conn| {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    conn.query_row("PRAGMA page_size", [], |row| row.get(0))
                })
                .await
                .unwrap();
            db.shutdown().await.unwrap();
            page_size as u64
        };

        scribble_pages(&path, page_size, &[3, 10]);

        let result = CacheDb::open(&path, StoreConfig::default()).await;
        assert!(matches!(result, Err(Error::IntegrityCheckFailed(_))), "unexpected open result: {result:?}");
        cleanup(&path);
    }
}
