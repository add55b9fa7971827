//! Status and health reporting over document and queue state.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use super::models::DocumentStatus;
use super::queue::queue_depth;
use crate::error::StorageError;
use crate::Result;

/// Snapshot of indexing state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub total_documents: i64,

    /// Counts keyed by status name. Every status is present.
    pub by_status: BTreeMap<String, i64>,

    /// Jobs `pending` or `processing`.
    pub queue_depth: i64,

    /// Latest document update (Unix seconds).
    pub last_update: Option<i64>,
}

impl StatusReport {
    /// Count for one status.
    #[must_use]
    pub fn count(&self, status: DocumentStatus) -> i64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Last update as RFC 3339, for display.
    #[must_use]
    pub fn last_update_rfc3339(&self) -> Option<String> {
        self.last_update
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.to_rfc3339())
    }
}

/// Build a status report.
///
/// # Errors
///
/// Returns an error if any query fails.
pub fn status_report(conn: &Connection) -> Result<StatusReport> {
    let mut by_status: BTreeMap<String, i64> = DocumentStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();

    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM documents GROUP BY status")
        .map_err(|e| StorageError::Database(format!("failed to prepare status query: {e}")))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| StorageError::Database(format!("failed to count documents: {e}")))?;

    for row in rows {
        let (status, count) = row.map_err(|e| StorageError::Database(e.to_string()))?;
        by_status.insert(status, count);
    }

    let total_documents = by_status.values().sum();

    let last_update: Option<i64> = conn
        .query_row("SELECT MAX(updated_at) FROM documents", [], |row| row.get(0))
        .map_err(|e| StorageError::Database(format!("failed to read last update: {e}")))?;

    Ok(StatusReport {
        total_documents,
        by_status,
        queue_depth: queue_depth(conn)?,
        last_update,
    })
}
