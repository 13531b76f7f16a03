//! Cache schema versions.
//!
//! `_migrations` records every applied version; on open, each script whose
//! version is above the recorded maximum runs once, in order.

use chrono::Utc;
use tokio_rusqlite::rusqlite::{self, params};
use tokio_rusqlite::Connection;

use super::Error;

/// Schema scripts keyed by ascending version.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_cache.sql"))];

fn applied_version(conn: &rusqlite::Connection) -> Result<i64, Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?)
}

/// Bring the schema up to the newest version.
///
/// A failing script aborts with [`Error::MigrationFailed`] and leaves the
/// recorded version at the last script that succeeded.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        let current = applied_version(conn)?;

        for &(version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
            tx.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::debug!(version, "applied cache schema version");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
