//! Durable, priority-ordered work queue.
//!
//! Jobs are claimed with [`dequeue`], which selects and marks a batch inside
//! one `BEGIN IMMEDIATE` transaction so concurrent workers (threads or
//! processes sharing the database file) never claim the same job.
//!
//! No deduplication happens here: several pending jobs for one document are
//! allowed because the worker's per-document pipeline is idempotent.

use rusqlite::{Connection, OptionalExtension, Row};
use std::time::Duration;

use super::connection::Database;
use super::models::{now_unix, truncate_error, DocumentKind, JobStatus, QueueJob};
use crate::error::StorageError;
use crate::Result;

/// Priority for background work (startup reconciliation, bulk re-index).
pub const PRIORITY_BACKGROUND: i64 = 5;

/// Priority for live change events and single-document triggers.
pub const PRIORITY_CHANGE: i64 = 10;

const JOB_COLUMNS: &str = "id, document_kind, document_id, priority, status, retry_count, \
     max_retries, error_message, created_at, available_at, started_at, completed_at";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<QueueJob> {
    Ok(QueueJob {
        id: row.get(0)?,
        document_kind: row.get(1)?,
        document_id: row.get(2)?,
        priority: row.get(3)?,
        status: row.get(4)?,
        retry_count: row.get(5)?,
        max_retries: row.get(6)?,
        error_message: row.get(7)?,
        created_at: row.get(8)?,
        available_at: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

/// Result of failing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Returned to `pending` with the new retry count.
    Retrying { retry_count: i64 },
    /// Retries exhausted; the job will not be claimed again.
    Exhausted,
}

/// Create a pending job and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn enqueue(
    conn: &Connection,
    kind: DocumentKind,
    document_id: &str,
    priority: i64,
    max_retries: u32,
) -> Result<i64> {
    let now = now_unix();
    conn.execute(
        "INSERT INTO embedding_queue \
         (document_kind, document_id, priority, status, retry_count, max_retries, \
          created_at, available_at) \
         VALUES (?, ?, ?, 'pending', 0, ?, ?, ?)",
        rusqlite::params![kind, document_id, priority, max_retries, now, now],
    )
    .map_err(|e| StorageError::Database(format!("failed to enqueue job: {e}")))?;

    let id = conn.last_insert_rowid();
    tracing::debug!(job_id = id, document_id, priority, "Enqueued job");
    Ok(id)
}

/// Atomically claim up to `batch_size` eligible jobs.
///
/// Eligible means `pending`, below its retry limit and past its
/// `available_at`. Ordered by priority descending, then FIFO.
///
/// # Errors
///
/// Returns an error if the transaction fails.
pub fn dequeue(db: &Database, batch_size: usize) -> Result<Vec<QueueJob>> {
    let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);

    db.with_transaction(|conn| {
        let now = now_unix();

        let mut jobs = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM embedding_queue \
                     WHERE status = 'pending' AND retry_count < max_retries \
                       AND available_at <= ? \
                     ORDER BY priority DESC, created_at ASC, id ASC \
                     LIMIT ?"
                ))
                .map_err(|e| StorageError::Database(format!("failed to prepare dequeue: {e}")))?;

            let rows = stmt
                .query_map(rusqlite::params![now, limit], row_to_job)
                .map_err(|e| StorageError::Database(format!("failed to select jobs: {e}")))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| StorageError::Database(format!("failed to read job: {e}")))?;
            rows
        };

        for job in &mut jobs {
            conn.execute(
                "UPDATE embedding_queue SET status = 'processing', started_at = ? WHERE id = ?",
                rusqlite::params![now, job.id],
            )
            .map_err(|e| StorageError::Database(format!("failed to claim job: {e}")))?;

            job.status = JobStatus::Processing;
            job.started_at = Some(now);
        }

        Ok(jobs)
    })
}

/// Mark a job completed. The last error of an earlier attempt is kept.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn complete_job(conn: &Connection, job_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE embedding_queue SET status = 'completed', completed_at = ? WHERE id = ?",
        rusqlite::params![now_unix(), job_id],
    )
    .map_err(|e| StorageError::Database(format!("failed to complete job: {e}")))?;

    Ok(())
}

/// Record a failed attempt.
///
/// The retry count is incremented; when it reaches `max_retries` the job
/// becomes `failed` for good, otherwise it returns to `pending`. A non-zero
/// `backoff` delays eligibility by `backoff * 2^(retry_count - 1)`.
///
/// # Errors
///
/// Returns an error if the job does not exist or the update fails.
pub fn fail_job(
    conn: &Connection,
    job_id: i64,
    error: &str,
    backoff: Duration,
) -> Result<FailOutcome> {
    let (retry_count, max_retries): (i64, i64) = conn
        .query_row(
            "SELECT retry_count, max_retries FROM embedding_queue WHERE id = ?",
            [job_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| StorageError::Database(format!("failed to load job: {e}")))?
        .ok_or_else(|| StorageError::not_found("job", job_id.to_string()))?;

    let retry_count = retry_count + 1;
    let now = now_unix();
    let error = truncate_error(error);

    if retry_count >= max_retries {
        conn.execute(
            "UPDATE embedding_queue SET status = 'failed', retry_count = ?, error_message = ?, \
             completed_at = ? WHERE id = ?",
            rusqlite::params![retry_count, error, now, job_id],
        )
        .map_err(|e| StorageError::Database(format!("failed to fail job: {e}")))?;

        return Ok(FailOutcome::Exhausted);
    }

    let available_at = now.saturating_add(backoff_secs(backoff, retry_count));
    conn.execute(
        "UPDATE embedding_queue SET status = 'pending', retry_count = ?, error_message = ?, \
         started_at = NULL, available_at = ? WHERE id = ?",
        rusqlite::params![retry_count, error, available_at, job_id],
    )
    .map_err(|e| StorageError::Database(format!("failed to requeue job: {e}")))?;

    Ok(FailOutcome::Retrying { retry_count })
}

fn backoff_secs(base: Duration, retry_count: i64) -> i64 {
    let base = i64::try_from(base.as_secs()).unwrap_or(i64::MAX);
    let exponent = u32::try_from(retry_count.saturating_sub(1).clamp(0, 30)).unwrap_or(30);
    base.saturating_mul(1_i64 << exponent)
}

/// Fail a job without retrying, e.g. when its document no longer exists.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn fail_permanently(conn: &Connection, job_id: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE embedding_queue SET status = 'failed', retry_count = max_retries, \
         error_message = ?, completed_at = ? WHERE id = ?",
        rusqlite::params![truncate_error(error), now_unix(), job_id],
    )
    .map_err(|e| StorageError::Database(format!("failed to fail job: {e}")))?;

    Ok(())
}

/// Return `processing` jobs started more than `older_than` ago to `pending`.
///
/// Retry counts are untouched: the attempt never reported a result.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn requeue_stale(conn: &Connection, older_than: Duration) -> Result<usize> {
    let cutoff = now_unix() - i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX / 2);

    let requeued = conn
        .execute(
            "UPDATE embedding_queue SET status = 'pending', started_at = NULL \
             WHERE status = 'processing' AND started_at < ?",
            [cutoff],
        )
        .map_err(|e| StorageError::Database(format!("failed to requeue stale jobs: {e}")))?;

    if requeued > 0 {
        tracing::warn!(count = requeued, "Requeued stale processing jobs");
    }

    Ok(requeued)
}

/// Number of jobs still in flight (`pending` or `processing`).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn queue_depth(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM embedding_queue WHERE status IN ('pending', 'processing')",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Database(e.to_string()).into())
}

/// Get a job by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_job(conn: &Connection, job_id: i64) -> Result<Option<QueueJob>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM embedding_queue WHERE id = ?"),
        [job_id],
        row_to_job,
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("failed to get job: {e}")).into())
}

/// All jobs for a document, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list_jobs_for_document(conn: &Connection, document_id: &str) -> Result<Vec<QueueJob>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM embedding_queue WHERE document_id = ? ORDER BY id"
        ))
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let jobs = stmt
        .query_map([document_id], row_to_job)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{migrate, Database};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| migrate(conn)).unwrap();
        db
    }

    fn push(db: &Database, doc: &str, priority: i64) -> i64 {
        db.with_conn(|conn| enqueue(conn, DocumentKind::Corpus, doc, priority, 3))
            .unwrap()
    }

    fn job(db: &Database, id: i64) -> QueueJob {
        db.with_conn(|conn| get_job(conn, id)).unwrap().unwrap()
    }

    #[test]
    fn test_enqueue_creates_pending_job() {
        let db = setup_db();
        let id = push(&db, "doc-1", PRIORITY_CHANGE);

        let j = job(&db, id);
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.priority, PRIORITY_CHANGE);
        assert_eq!(j.retry_count, 0);
        assert_eq!(j.max_retries, 3);
        assert_eq!(j.document_kind, DocumentKind::Corpus);
    }

    #[test]
    fn test_dequeue_orders_by_priority_then_fifo() {
        let db = setup_db();
        let low_first = push(&db, "a", PRIORITY_BACKGROUND);
        let high = push(&db, "b", PRIORITY_CHANGE);
        let low_second = push(&db, "c", PRIORITY_BACKGROUND);

        let batch = dequeue(&db, 10).unwrap();
        let ids: Vec<i64> = batch.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high, low_first, low_second]);
        assert!(batch.iter().all(|j| j.status == JobStatus::Processing));
        assert!(batch.iter().all(|j| j.started_at.is_some()));

        // Everything is claimed now
        assert!(dequeue(&db, 10).unwrap().is_empty());
    }

    #[test]
    fn test_dequeue_respects_batch_size() {
        let db = setup_db();
        for i in 0..5 {
            push(&db, &format!("doc-{i}"), PRIORITY_BACKGROUND);
        }

        assert_eq!(dequeue(&db, 2).unwrap().len(), 2);
        assert_eq!(dequeue(&db, 2).unwrap().len(), 2);
        assert_eq!(dequeue(&db, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_jobs_for_same_document_allowed() {
        let db = setup_db();
        push(&db, "doc-1", PRIORITY_CHANGE);
        push(&db, "doc-1", PRIORITY_CHANGE);

        let jobs = db
            .with_conn(|conn| list_jobs_for_document(conn, "doc-1"))
            .unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_complete_job() {
        let db = setup_db();
        let id = push(&db, "doc-1", PRIORITY_CHANGE);
        dequeue(&db, 1).unwrap();

        db.with_conn(|conn| complete_job(conn, id)).unwrap();

        let j = job(&db, id);
        assert_eq!(j.status, JobStatus::Completed);
        assert!(j.completed_at.is_some());
        assert_eq!(db.with_conn(queue_depth).unwrap(), 0);
    }

    #[test]
    fn test_complete_after_retry_keeps_last_error() {
        let db = setup_db();
        let id = push(&db, "doc-1", PRIORITY_CHANGE);

        dequeue(&db, 1).unwrap();
        db.with_conn(|conn| fail_job(conn, id, "embedding timeout", Duration::ZERO))
            .unwrap();
        dequeue(&db, 1).unwrap();
        db.with_conn(|conn| complete_job(conn, id)).unwrap();

        let j = job(&db, id);
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.retry_count, 1);
        assert_eq!(j.error_message.as_deref(), Some("embedding timeout"));
    }

    #[test]
    fn test_fail_job_retries_then_exhausts() {
        let db = setup_db();
        let id = push(&db, "doc-1", PRIORITY_CHANGE);

        for expected_retry in 1..=2 {
            let claimed = dequeue(&db, 1).unwrap();
            assert_eq!(claimed.len(), 1);

            let outcome = db
                .with_conn(|conn| fail_job(conn, id, "file not found", Duration::ZERO))
                .unwrap();
            assert_eq!(
                outcome,
                FailOutcome::Retrying {
                    retry_count: expected_retry
                }
            );

            let j = job(&db, id);
            assert_eq!(j.status, JobStatus::Pending);
            assert_eq!(j.retry_count, expected_retry);
            assert_eq!(j.error_message.as_deref(), Some("file not found"));
        }

        dequeue(&db, 1).unwrap();
        let outcome = db
            .with_conn(|conn| fail_job(conn, id, "file not found", Duration::ZERO))
            .unwrap();
        assert_eq!(outcome, FailOutcome::Exhausted);

        let j = job(&db, id);
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.retry_count, 3);
        assert!(j.completed_at.is_some());

        // Never claimed again
        assert!(dequeue(&db, 10).unwrap().is_empty());
    }

    #[test]
    fn test_fail_job_truncates_error() {
        let db = setup_db();
        let id = push(&db, "doc-1", PRIORITY_CHANGE);
        let long = "e".repeat(2_000);

        db.with_conn(|conn| fail_job(conn, id, &long, Duration::ZERO))
            .unwrap();

        let j = job(&db, id);
        assert_eq!(j.error_message.unwrap().len(), 500);
    }

    #[test]
    fn test_fail_job_unknown_id() {
        let db = setup_db();
        let result = db.with_conn(|conn| fail_job(conn, 999, "x", Duration::ZERO));
        assert!(result.is_err());
    }

    #[test]
    fn test_backoff_delays_eligibility() {
        let db = setup_db();
        let id = push(&db, "doc-1", PRIORITY_CHANGE);
        dequeue(&db, 1).unwrap();

        db.with_conn(|conn| fail_job(conn, id, "timeout", Duration::from_secs(60)))
            .unwrap();

        let j = job(&db, id);
        assert_eq!(j.status, JobStatus::Pending);
        assert!(j.available_at >= now_unix() + 59);
        assert!(dequeue(&db, 10).unwrap().is_empty());
    }

    #[test]
    fn test_backoff_secs_doubles() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_secs(base, 1), 10);
        assert_eq!(backoff_secs(base, 2), 20);
        assert_eq!(backoff_secs(base, 3), 40);
        assert_eq!(backoff_secs(Duration::ZERO, 5), 0);
    }

    #[test]
    fn test_fail_permanently() {
        let db = setup_db();
        let id = push(&db, "ghost", PRIORITY_CHANGE);
        dequeue(&db, 1).unwrap();

        db.with_conn(|conn| fail_permanently(conn, id, "document not found"))
            .unwrap();

        let j = job(&db, id);
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.retry_count, j.max_retries);
    }

    #[test]
    fn test_requeue_stale() {
        let db = setup_db();
        let id = push(&db, "doc-1", PRIORITY_CHANGE);
        dequeue(&db, 1).unwrap();

        // Fresh claim is not stale
        assert_eq!(
            db.with_conn(|conn| requeue_stale(conn, Duration::from_secs(600)))
                .unwrap(),
            0
        );

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE embedding_queue SET started_at = started_at - 3600 WHERE id = ?",
                [id],
            )
            .unwrap();
            Ok(())
        })
        .unwrap();

        assert_eq!(
            db.with_conn(|conn| requeue_stale(conn, Duration::from_secs(600)))
                .unwrap(),
            1
        );

        let j = job(&db, id);
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.retry_count, 0);
        assert_eq!(dequeue(&db, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_dequeue_claims_each_job_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("queue.db");

        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| migrate(conn)).unwrap();
        for i in 0..200 {
            push(&db, &format!("doc-{i}"), i % 3);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    // Separate connection per thread, like separate worker processes
                    let db = Database::open(&path).unwrap();
                    let mut claimed = Vec::new();
                    loop {
                        let batch = dequeue(&db, 7).unwrap();
                        if batch.is_empty() {
                            break;
                        }
                        claimed.extend(batch.into_iter().map(|j| j.id));
                    }
                    claimed
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.join().unwrap() {
                total += 1;
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }

        assert_eq!(total, 200);
        assert_eq!(seen.len(), 200);
    }
}
