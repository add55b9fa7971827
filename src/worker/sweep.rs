//! Vector cleanup for tombstoned documents.

use crate::observability::metrics;
use crate::storage::{get_document, list_documents, Database, DocumentFilter, DocumentStatus};
use crate::vector::VectorIndex;
use crate::Result;

/// Delete the vectors of every `deleted` document. Returns the number of
/// points removed.
///
/// Each document is re-read just before its delete so a record revived by
/// the detector in the meantime keeps its vectors.
///
/// # Errors
///
/// Returns an error if the tombstone listing fails. Per-document delete
/// failures are logged and skipped.
pub async fn sweep_deleted(db: &Database, vectors: &dyn VectorIndex) -> Result<usize> {
    let tombstones = db.with_conn(|conn| {
        list_documents(
            conn,
            &DocumentFilter {
                status: Some(DocumentStatus::Deleted),
                ..DocumentFilter::default()
            },
        )
    })?;

    let mut removed = 0;

    for document in tombstones {
        let still_deleted = db
            .with_conn(|conn| get_document(conn, &document.id))?
            .is_some_and(|d| d.is_deleted());
        if !still_deleted {
            continue;
        }

        match vectors.delete_by_document(document.kind, &document.path).await {
            Ok(0) => {}
            Ok(count) => {
                tracing::info!(path = %document.path, count, "Removed vectors of deleted document");
                metrics::record_vectors_deleted(count);
                removed += count;
            }
            Err(e) => {
                tracing::warn!(path = %document.path, error = %e, "Failed to remove vectors");
            }
        }
    }

    Ok(removed)
}
