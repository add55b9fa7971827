//! Document record storage.
//!
//! The Change Detector writes fingerprint fields and resets status to
//! `pending`; the Indexing Worker writes the `indexed`/`failed` transitions,
//! along with the fingerprint of the content it actually indexed.

use rusqlite::{Connection, OptionalExtension, Row};

use super::models::{
    now_unix, truncate_error, DocumentKind, DocumentMetadata, DocumentRecord, DocumentStatus,
};
use crate::error::StorageError;
use crate::Result;

const DOCUMENT_COLUMNS: &str = "id, kind, path, content_hash, size, modified_at, status, \
     chunk_count, indexed_at, error_message, metadata, created_at, updated_at";

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let metadata_json: String = row.get(10)?;
    let metadata: DocumentMetadata = serde_json::from_str(&metadata_json).unwrap_or_default();

    Ok(DocumentRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        path: row.get(2)?,
        content_hash: row.get(3)?,
        size: row.get(4)?,
        modified_at: row.get(5)?,
        status: row.get(6)?,
        chunk_count: row.get(7)?,
        indexed_at: row.get(8)?,
        error_message: row.get(9)?,
        metadata,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn metadata_to_json(metadata: &DocumentMetadata) -> Result<String> {
    serde_json::to_string(metadata)
        .map_err(|e| StorageError::Database(format!("failed to encode metadata: {e}")).into())
}

/// Insert a new document record.
///
/// # Errors
///
/// Returns an error if the insert fails (including a duplicate kind/path).
pub fn insert_document(conn: &Connection, record: &DocumentRecord) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO documents ({DOCUMENT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ),
        rusqlite::params![
            record.id,
            record.kind,
            record.path,
            record.content_hash,
            record.size,
            record.modified_at,
            record.status,
            record.chunk_count,
            record.indexed_at,
            record.error_message,
            metadata_to_json(&record.metadata)?,
            record.created_at,
            record.updated_at,
        ],
    )
    .map_err(|e| StorageError::Database(format!("failed to insert document: {e}")))?;

    Ok(())
}

/// Get a document by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_document(conn: &Connection, id: &str) -> Result<Option<DocumentRecord>> {
    conn.query_row(
        &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"),
        [id],
        row_to_document,
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("failed to get document: {e}")).into())
}

/// Get a document by source kind and relative path.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_document_by_path(
    conn: &Connection,
    kind: DocumentKind,
    path: &str,
) -> Result<Option<DocumentRecord>> {
    conn.query_row(
        &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE kind = ? AND path = ?"),
        rusqlite::params![kind, path],
        row_to_document,
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("failed to get document: {e}")).into())
}

/// Record a new fingerprint and reset the document to `pending`.
///
/// Clears chunk count, indexed timestamp and error.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn update_fingerprint(
    conn: &Connection,
    id: &str,
    content_hash: &str,
    size: i64,
    modified_at: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE documents SET content_hash = ?, size = ?, modified_at = ?, status = 'pending', \
         chunk_count = 0, indexed_at = NULL, error_message = NULL, updated_at = ? WHERE id = ?",
        rusqlite::params![content_hash, size, modified_at, now_unix(), id],
    )
    .map_err(|e| StorageError::Database(format!("failed to update fingerprint: {e}")))?;

    Ok(())
}

/// Tombstone a document. Returns `true` if its status changed.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn mark_deleted(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE documents SET status = 'deleted', updated_at = ? \
             WHERE id = ? AND status != 'deleted'",
            rusqlite::params![now_unix(), id],
        )
        .map_err(|e| StorageError::Database(format!("failed to mark deleted: {e}")))?;

    Ok(changed > 0)
}

/// Mark a document indexed with the fingerprint of the content that was
/// actually read, but only if the stored fingerprint still equals
/// `observed_hash`, the value seen when the job started. Returns `false`
/// when a newer fingerprint has been recorded in the meantime.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn mark_indexed(
    conn: &Connection,
    id: &str,
    observed_hash: &str,
    content_hash: &str,
    size: i64,
    chunk_count: usize,
    metadata: &DocumentMetadata,
) -> Result<bool> {
    let now = now_unix();
    let changed = conn
        .execute(
            "UPDATE documents SET status = 'indexed', content_hash = ?, size = ?, \
             chunk_count = ?, indexed_at = ?, error_message = NULL, metadata = ?, updated_at = ? \
             WHERE id = ? AND content_hash = ? AND status != 'deleted'",
            rusqlite::params![
                content_hash,
                size,
                i64::try_from(chunk_count).unwrap_or(i64::MAX),
                now,
                metadata_to_json(metadata)?,
                now,
                id,
                observed_hash,
            ],
        )
        .map_err(|e| StorageError::Database(format!("failed to mark indexed: {e}")))?;

    Ok(changed > 0)
}

/// Mark a document failed with an error message. Tombstoned documents are
/// left alone. Returns `true` if the record changed.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE documents SET status = 'failed', error_message = ?, updated_at = ? \
             WHERE id = ? AND status != 'deleted'",
            rusqlite::params![truncate_error(error), now_unix(), id],
        )
        .map_err(|e| StorageError::Database(format!("failed to mark failed: {e}")))?;

    Ok(changed > 0)
}

/// Reset a document for a manual re-index, keeping its fingerprint.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn reset_for_reindex(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE documents SET status = 'pending', chunk_count = 0, indexed_at = NULL, \
         error_message = NULL, updated_at = ? WHERE id = ?",
        rusqlite::params![now_unix(), id],
    )
    .map_err(|e| StorageError::Database(format!("failed to reset document: {e}")))?;

    Ok(())
}

/// Filters for [`list_documents`].
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub kind: Option<DocumentKind>,
    pub status: Option<DocumentStatus>,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

/// List documents ordered by path.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list_documents(conn: &Connection, filter: &DocumentFilter) -> Result<Vec<DocumentRecord>> {
    let mut sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE 1=1");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(kind) = filter.kind {
        sql.push_str(" AND kind = ?");
        params.push(Box::new(kind));
    }
    if let Some(status) = filter.status {
        sql.push_str(" AND status = ?");
        params.push(Box::new(status));
    }
    if let Some(ref category) = filter.category {
        sql.push_str(" AND json_extract(metadata, '$.category') = ?");
        params.push(Box::new(category.clone()));
    }

    sql.push_str(" ORDER BY kind, path");

    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::Database(format!("failed to prepare list: {e}")))?;

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();

    let docs = stmt
        .query_map(param_refs.as_slice(), row_to_document)
        .map_err(|e| StorageError::Database(format!("failed to list documents: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(format!("failed to read document: {e}")))?;

    Ok(docs)
}

/// Ids and paths of all non-deleted documents of a kind.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list_active_paths(conn: &Connection, kind: DocumentKind) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare("SELECT id, path FROM documents WHERE kind = ? AND status != 'deleted' ORDER BY path")
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let rows = stmt
        .query_map([kind], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(rows)
}

/// Count documents, optionally by status.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_documents(conn: &Connection, status: Option<DocumentStatus>) -> Result<i64> {
    let result = match status {
        Some(status) => conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE status = ?",
            [status],
            |row| row.get(0),
        ),
        None => conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0)),
    };

    result.map_err(|e| StorageError::Database(e.to_string()).into())
}
