use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::Connection;

use super::{CacheError, Fingerprint, ReportCache};
use crate::report::FinalReport;

/// SQLite-backed report cache. Survives restarts and can be shared by
/// several processes pointing at the same file.
pub struct SqliteReportCache {
    conn: Mutex<Connection>,
}

impl SqliteReportCache {
    /// Open or create the reports table at `path`, creating parent
    /// directories as needed. Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        if path != ":memory:"
            && let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS reports (
                fingerprint TEXT PRIMARY KEY,
                report      TEXT NOT NULL,
                updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::open(":memory:")
    }

    /// Number of stored reports.
    pub fn len(&self) -> Result<usize, CacheError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ReportCache for SqliteReportCache {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<FinalReport>, CacheError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare("SELECT report FROM reports WHERE fingerprint = ?1")?;
        let mut rows = stmt.query([fingerprint.as_str()])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, fingerprint: &Fingerprint, report: FinalReport) -> Result<(), CacheError> {
        let json = serde_json::to_string(&report)?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO reports (fingerprint, report) VALUES (?1, ?2)
             ON CONFLICT(fingerprint) DO UPDATE
             SET report = excluded.report, updated_at = datetime('now')",
            [fingerprint.as_str(), json.as_str()],
        )?;
        tracing::debug!(fingerprint = %fingerprint, "report cached in sqlite");
        Ok(())
    }
}
