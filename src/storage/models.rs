//! Data models for the metadata store.
//!
//! This module defines the core data structures used for:
//! - Document records (per-path indexing state)
//! - Queue jobs (requested indexing attempts)
//! - Path-derived document metadata

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum stored length of an error message, in characters.
pub const MAX_ERROR_LEN: usize = 500;

/// Get current Unix timestamp.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
        .unwrap_or(0)
}

/// Truncate an error message to the stored maximum.
#[must_use]
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// Implements `Display`, `FromStr` and the rusqlite conversions for a
/// string-backed enum.
macro_rules! text_enum {
    ($name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// The stored string form.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{other}'", $label)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

/// Which source a document comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// The watched document corpus.
    Corpus,
    /// Files uploaded by users.
    UserUpload,
}

text_enum!(DocumentKind, "document kind" {
    Corpus => "corpus",
    UserUpload => "user_upload",
});

/// Indexing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Indexed,
    Failed,
    Deleted,
}

text_enum!(DocumentStatus, "document status" {
    Pending => "pending",
    Indexed => "indexed",
    Failed => "failed",
    Deleted => "deleted",
});

impl DocumentStatus {
    /// All statuses, in reporting order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Indexed, Self::Failed, Self::Deleted];
}

/// Status of a queue job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

text_enum!(JobStatus, "job status" {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

/// Metadata derived from a document's location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Category bucket.
    pub category: String,

    /// Fixed tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Free-form note, e.g. why a document produced no chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DocumentMetadata {
    /// Create metadata with a category and tags.
    #[must_use]
    pub fn new(category: impl Into<String>, tags: &[&str]) -> Self {
        Self {
            category: category.into(),
            tags: tags.iter().map(ToString::to_string).collect(),
            note: None,
        }
    }

    /// Attach a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Indexing state for one source-relative path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Source discriminator.
    pub kind: DocumentKind,

    /// Path relative to the source root, `/`-separated.
    pub path: String,

    /// blake3 hex digest of the raw bytes.
    pub content_hash: String,

    /// Size in bytes.
    pub size: i64,

    /// Source modification time (Unix seconds).
    pub modified_at: i64,

    pub status: DocumentStatus,

    /// Chunks produced by the last successful run.
    pub chunk_count: i64,

    /// When the document was last indexed.
    pub indexed_at: Option<i64>,

    /// Last recorded error.
    pub error_message: Option<String>,

    pub metadata: DocumentMetadata,

    pub created_at: i64,
    pub updated_at: i64,
}

impl DocumentRecord {
    /// Create a new pending record.
    #[must_use]
    pub fn new(
        kind: DocumentKind,
        path: impl Into<String>,
        content_hash: impl Into<String>,
        size: i64,
        modified_at: i64,
    ) -> Self {
        let now = now_unix();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            path: path.into(),
            content_hash: content_hash.into(),
            size,
            modified_at,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            indexed_at: None,
            error_message: None,
            metadata: DocumentMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record is tombstoned.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == DocumentStatus::Deleted
    }
}

/// One requested (re)indexing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: i64,
    pub document_kind: DocumentKind,
    pub document_id: String,

    /// Higher is more urgent.
    pub priority: i64,

    pub status: JobStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    pub error_message: Option<String>,
    pub created_at: i64,

    /// Earliest time the job may be claimed.
    pub available_at: i64,

    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_unix() {
        let now = now_unix();
        assert!(now > 1_600_000_000);
    }

    #[test]
    fn test_document_kind_round_trip() {
        assert_eq!(DocumentKind::UserUpload.as_str(), "user_upload");
        assert_eq!(
            "user_upload".parse::<DocumentKind>().unwrap(),
            DocumentKind::UserUpload
        );
        assert!("ragbot".parse::<DocumentKind>().is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DocumentStatus::Deleted.to_string(), "deleted");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = DocumentRecord::new(DocumentKind::Corpus, "a/b.md", "h1", 10, 100);
        assert_eq!(record.status, DocumentStatus::Pending);
        assert_eq!(record.chunk_count, 0);
        assert!(record.indexed_at.is_none());
        assert!(!record.is_deleted());
        assert!(uuid::Uuid::parse_str(&record.id).is_ok());
    }

    #[test]
    fn test_truncate_error() {
        let long = "x".repeat(800);
        assert_eq!(truncate_error(&long).chars().count(), MAX_ERROR_LEN);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn test_metadata_serialization_skips_empty_note() {
        let meta = DocumentMetadata::new("unknown", &[]);
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"category":"unknown","tags":[]}"#);

        let noted = meta.with_note("empty");
        let json = serde_json::to_string(&noted).unwrap();
        assert!(json.contains(r#""note":"empty""#));
    }
}
