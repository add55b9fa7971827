//! `SQLite` vector index using the `sqlite-vec` extension.
//!
//! Points live in a plain table with the embedding as a little-endian `f32`
//! BLOB; similarity queries use `vec_distance_cosine`.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use uuid::Uuid;

use super::{ChunkPayload, ScoredPoint, VectorIndex, VectorPoint};
use crate::error::{EmbeddingError, VectorError};
use crate::storage::{DocumentKind, Database};
use crate::Result;

// Static guard to ensure sqlite-vec is initialized exactly once
static INIT: Once = Once::new();

/// Register sqlite-vec globally so every new connection has it.
///
/// Safe to call multiple times; the `Once` guard makes later calls no-ops.
#[allow(unsafe_code)]
pub fn init_sqlite_vec() {
    INIT.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the extension's entry point and has the
        // signature `sqlite3_auto_extension` expects; the Once guard prevents
        // double registration.
        #[allow(clippy::missing_transmute_annotations)]
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::info!("sqlite-vec extension registered globally via sqlite3_auto_extension");
    });
}

fn load_extension(conn: &Connection) -> Result<String> {
    conn.query_row("SELECT vec_version()", [], |row| row.get(0))
        .map_err(|e| {
            VectorError::ExtensionUnavailable(format!(
                "sqlite-vec not loaded, was init_sqlite_vec() called before opening? {e}"
            ))
            .into()
        })
}

fn backend(context: &str) -> impl Fn(rusqlite::Error) -> VectorError + '_ {
    move |e| VectorError::Backend(format!("{context}: {e}"))
}

/// Convert a vector to a blob for storage.
fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a blob back to a vector.
fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| VectorError::Payload(format!("bad point id '{raw}': {e}")).into())
}

fn parse_payload(raw: &str) -> Result<ChunkPayload> {
    serde_json::from_str(raw).map_err(|e| VectorError::Payload(e.to_string()).into())
}

/// Vector index stored in its own `SQLite` database.
#[derive(Debug, Clone)]
pub struct SqliteVectorIndex {
    db: Database,
    collection: String,
}

impl SqliteVectorIndex {
    /// Open (or create) the index database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or sqlite-vec is
    /// unavailable.
    pub fn open(path: impl AsRef<Path>, collection: impl Into<String>) -> Result<Self> {
        init_sqlite_vec();
        Self::with_database(Database::open(path)?, collection)
    }

    /// In-memory index for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if sqlite-vec is unavailable.
    pub fn open_in_memory(collection: impl Into<String>) -> Result<Self> {
        init_sqlite_vec();
        Self::with_database(Database::open_in_memory()?, collection)
    }

    fn with_database(db: Database, collection: impl Into<String>) -> Result<Self> {
        db.with_conn(|conn| {
            let version = load_extension(conn)?;
            tracing::debug!(version = %version, "sqlite-vec extension verified");

            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS vector_collections (
                    name TEXT PRIMARY KEY,
                    dimension INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS vector_points (
                    collection TEXT NOT NULL,
                    id TEXT NOT NULL,
                    source TEXT NOT NULL,
                    file_path TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    PRIMARY KEY (collection, id)
                );

                CREATE INDEX IF NOT EXISTS idx_vector_points_document
                    ON vector_points(collection, source, file_path);
                ",
            )
            .map_err(backend("failed to create vector tables"))?;

            Ok(())
        })?;

        Ok(Self {
            db,
            collection: collection.into(),
        })
    }

    /// Collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn dimension(&self, conn: &Connection) -> Result<Option<usize>> {
        let dim: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM vector_collections WHERE name = ?",
                [&self.collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend("failed to read collection"))?;

        Ok(dim.and_then(|d| usize::try_from(d).ok()))
    }

    /// Total points in the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM vector_points WHERE collection = ?",
                    [&self.collection],
                    |row| row.get(0),
                )
                .map_err(backend("failed to count points"))?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        self.db.with_conn(|conn| {
            match self.dimension(conn)? {
                Some(existing) if existing == dimension => {
                    tracing::debug!(collection = %self.collection, "Collection already exists");
                    Ok(())
                }
                Some(existing) => Err(EmbeddingError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                }
                .into()),
                None => {
                    conn.execute(
                        "INSERT INTO vector_collections (name, dimension) VALUES (?, ?)",
                        rusqlite::params![
                            self.collection,
                            i64::try_from(dimension).unwrap_or(i64::MAX)
                        ],
                    )
                    .map_err(backend("failed to create collection"))?;

                    tracing::info!(
                        collection = %self.collection,
                        dimension,
                        "Created vector collection"
                    );
                    Ok(())
                }
            }
        })
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        self.db.with_transaction(|conn| {
            let dimension = self.dimension(conn)?.ok_or_else(|| {
                VectorError::Backend(format!("collection '{}' does not exist", self.collection))
            })?;

            let mut stmt = conn
                .prepare(
                    "INSERT OR REPLACE INTO vector_points \
                     (collection, id, source, file_path, chunk_index, payload, embedding) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(backend("failed to prepare upsert"))?;

            for point in &points {
                if point.vector.len() != dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: dimension,
                        actual: point.vector.len(),
                    }
                    .into());
                }

                let payload = serde_json::to_string(&point.payload)
                    .map_err(|e| VectorError::Payload(e.to_string()))?;

                stmt.execute(rusqlite::params![
                    self.collection,
                    point.id.to_string(),
                    point.payload.source,
                    point.payload.file_path,
                    i64::try_from(point.payload.chunk_index).unwrap_or(i64::MAX),
                    payload,
                    vector_to_blob(&point.vector),
                ])
                .map_err(backend("failed to upsert point"))?;
            }

            Ok(())
        })?;

        tracing::debug!(count = points.len(), "Upserted points");
        Ok(())
    }

    async fn delete_by_document(&self, source: DocumentKind, file_path: &str) -> Result<usize> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM vector_points WHERE collection = ? AND source = ? AND file_path = ?",
                rusqlite::params![self.collection, source, file_path],
            )
            .map_err(|e| VectorError::Backend(format!("failed to delete points: {e}")).into())
        })
    }

    async fn scroll_by_document(
        &self,
        source: DocumentKind,
        file_path: &str,
    ) -> Result<Vec<VectorPoint>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, payload, embedding FROM vector_points \
                     WHERE collection = ? AND source = ? AND file_path = ? \
                     ORDER BY chunk_index",
                )
                .map_err(backend("failed to prepare scroll"))?;

            let rows = stmt
                .query_map(rusqlite::params![self.collection, source, file_path], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })
                .map_err(backend("failed to scroll points"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(backend("failed to read point"))?;

            rows.into_iter()
                .map(|(id, payload, blob)| {
                    Ok(VectorPoint {
                        id: parse_id(&id)?,
                        vector: blob_to_vector(&blob),
                        payload: parse_payload(&payload)?,
                    })
                })
                .collect()
        })
    }

    async fn count_by_document(&self, source: DocumentKind, file_path: &str) -> Result<usize> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM vector_points \
                     WHERE collection = ? AND source = ? AND file_path = ?",
                    rusqlite::params![self.collection, source, file_path],
                    |row| row.get(0),
                )
                .map_err(backend("failed to count points"))?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredPoint>> {
        let blob = vector_to_blob(query);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, payload, vec_distance_cosine(embedding, ?) AS distance \
                     FROM vector_points WHERE collection = ? \
                     ORDER BY distance ASC LIMIT ?",
                )
                .map_err(backend("failed to prepare search"))?;

            let rows = stmt
                .query_map(rusqlite::params![blob, self.collection, limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                })
                .map_err(backend("failed to execute search"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(backend("failed to read result"))?;

            rows.into_iter()
                .map(|(id, payload, distance)| {
                    #[allow(clippy::cast_possible_truncation)]
                    let score = (1.0 - distance) as f32;
                    Ok(ScoredPoint {
                        id: parse_id(&id)?,
                        score,
                        payload: parse_payload(&payload)?,
                    })
                })
                .collect()
        })
    }

    async fn health_check(&self) -> Result<()> {
        self.db.with_conn(|conn| load_extension(conn).map(|_| ()))
    }
}
