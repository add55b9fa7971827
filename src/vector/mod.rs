//! Vector index interface.
//!
//! The indexing worker is the only writer. Every point belongs to one
//! document and is keyed by [`point_id`], so re-upserting a chunk after a
//! crash overwrites instead of duplicating. Cleanup filters on the payload's
//! `source` and `file_path` fields.

mod sqlite;

pub use sqlite::{init_sqlite_vec, SqliteVectorIndex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::DocumentKind;
use crate::Result;

/// Payload stored with each chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,

    /// Source discriminator.
    pub source: DocumentKind,

    /// Source-relative path.
    pub file_path: String,

    pub chunk_index: usize,

    /// Chunk text.
    pub text: String,

    /// Fingerprint of the document content this chunk came from.
    pub content_hash: String,

    pub category: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Unix seconds.
    pub indexed_at: i64,
}

/// A point ready to be upserted.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: Uuid,

    /// Cosine similarity, higher is closer.
    pub score: f32,

    pub payload: ChunkPayload,
}

/// Deterministic point id for a document chunk.
#[must_use]
pub fn point_id(document_id: &str, chunk_index: usize) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{document_id}:{chunk_index}").as_bytes(),
    )
}

/// Similarity index holding one point per chunk.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if missing, checking its dimension otherwise.
    async fn ensure_collection(&self, dimension: usize) -> Result<()>;

    /// Insert or overwrite points by id.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// Remove every point of one document. Returns the number removed.
    async fn delete_by_document(&self, source: DocumentKind, file_path: &str) -> Result<usize>;

    /// All points of one document, ordered by chunk index.
    async fn scroll_by_document(
        &self,
        source: DocumentKind,
        file_path: &str,
    ) -> Result<Vec<VectorPoint>>;

    /// Number of points stored for one document.
    async fn count_by_document(&self, source: DocumentKind, file_path: &str) -> Result<usize>;

    /// Nearest neighbours of `query` by cosine similarity.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredPoint>>;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> Result<()>;
}
