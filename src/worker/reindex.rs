//! Manual re-index triggers.

use crate::error::StorageError;
use crate::storage::{
    enqueue, get_document_by_path, list_documents, reset_for_reindex, Database, DocumentFilter,
    DocumentKind,
};
use crate::Result;

/// Reset one document and queue a job for it. Returns the job id.
///
/// # Errors
///
/// Returns `StorageError::NotFound` if no live document has this path.
pub fn reindex_document(
    db: &Database,
    kind: DocumentKind,
    path: &str,
    priority: i64,
    max_retries: u32,
) -> Result<i64> {
    let job_id = db.with_transaction(|conn| {
        let document = get_document_by_path(conn, kind, path)?
            .filter(|d| !d.is_deleted())
            .ok_or_else(|| StorageError::not_found("document", path))?;

        reset_for_reindex(conn, &document.id)?;
        enqueue(conn, kind, &document.id, priority, max_retries)
    })?;

    tracing::info!(path, kind = %kind, job_id, "Queued manual re-index");
    Ok(job_id)
}

/// Reset every live document and queue a job for each. Returns how many
/// were queued.
///
/// # Errors
///
/// Returns an error if the listing or any update fails; nothing is queued
/// in that case.
pub fn reindex_all(db: &Database, priority: i64, max_retries: u32) -> Result<usize> {
    let queued = db.with_transaction(|conn| {
        let documents = list_documents(conn, &DocumentFilter::default())?;

        let mut queued = 0;
        for document in documents.iter().filter(|d| !d.is_deleted()) {
            reset_for_reindex(conn, &document.id)?;
            enqueue(conn, document.kind, &document.id, priority, max_retries)?;
            queued += 1;
        }
        Ok(queued)
    })?;

    tracing::info!(count = queued, priority, "Queued full re-index");
    Ok(queued)
}
