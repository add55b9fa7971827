//! `SQLite` metadata store.
//!
//! This module provides persistent storage for:
//! - Document records (fingerprint and indexing state per path)
//! - The embedding work queue
//! - Status reporting

mod connection;
mod documents;
mod models;
mod queue;
mod schema;
mod status;

pub use connection::Database;
pub use documents::{
    count_documents, get_document, get_document_by_path, insert_document, list_active_paths,
    list_documents, mark_deleted, mark_failed, mark_indexed, reset_for_reindex,
    update_fingerprint, DocumentFilter,
};
pub use models::{
    now_unix, truncate_error, DocumentKind, DocumentMetadata, DocumentRecord, DocumentStatus,
    JobStatus, QueueJob, MAX_ERROR_LEN,
};
pub use queue::{
    complete_job, dequeue, enqueue, fail_job, fail_permanently, get_job, list_jobs_for_document,
    queue_depth, requeue_stale, FailOutcome, PRIORITY_BACKGROUND, PRIORITY_CHANGE,
};
pub use schema::{migrate, verify_schema, SCHEMA_VERSION};
pub use status::{status_report, StatusReport};

/// Initialize storage with migrations.
///
/// # Errors
///
/// Returns an error if database initialization fails.
pub fn init_storage(db: &Database) -> crate::Result<()> {
    db.with_conn(|conn| {
        migrate(conn)?;
        verify_schema(conn)?;

        tracing::info!("Storage initialized, schema version {SCHEMA_VERSION}");
        Ok(())
    })
}
