//! Error types and Result aliases for docindex.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use thiserror::Error;

/// Result type alias using docindex's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for docindex operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Metadata store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Embedding service error.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Vector index error.
    #[error("vector index error: {0}")]
    Vector(#[from] VectorError),

    /// Change detection error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Indexing pipeline error.
    #[error("indexing error: {0}")]
    Indexing(#[from] IndexingError),

    /// Metrics endpoint error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// `SQLite` database error.
    #[error("database error: {0}")]
    Database(String),

    /// Record not found.
    #[error("not found: {entity} with id '{id}'")]
    NotFound { entity: &'static str, id: String },

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Embedding service errors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Transport or HTTP status failure talking to the service.
    #[error("request failed: {0}")]
    Request(String),

    /// The service answered with something we could not use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Returned vector has the wrong dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Vector index errors.
#[derive(Error, Debug)]
pub enum VectorError {
    /// Backend operation failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(String),

    /// sqlite-vec extension missing.
    #[error("extension unavailable: {0}")]
    ExtensionUnavailable(String),
}

/// Metrics endpoint errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {address}: {reason}")]
    BindFailed { address: String, reason: String },

    /// Server stopped with an error.
    #[error("server failed: {0}")]
    Serve(String),
}

/// Change detector errors.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to watch path.
    #[error("failed to watch path '{path}': {reason}")]
    WatchFailed { path: String, reason: String },

    /// File could not be stat'ed or hashed.
    #[error("failed to fingerprint '{path}': {reason}")]
    Fingerprint { path: String, reason: String },

    /// Path is not under the watched root.
    #[error("path '{path}' is outside root '{root}'")]
    OutsideRoot { path: String, root: String },
}

/// Indexing pipeline errors.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// The job references a document record that does not exist.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The source file is gone.
    #[error("file not found: {0}")]
    FileMissing(String),

    /// The source file is not valid UTF-8 text.
    #[error("unreadable content in '{path}': {reason}")]
    UnreadableContent { path: String, reason: String },

    /// No source is configured for a document kind.
    #[error("no source configured for document kind '{0}'")]
    SourceUnavailable(String),

    /// Embedding count does not match chunk count.
    #[error("embedding count mismatch: {chunks} chunks, {embeddings} embeddings")]
    EmbeddingCountMismatch { chunks: usize, embeddings: usize },
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the job that produced this error cannot help.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Indexing(IndexingError::DocumentNotFound(_)))
    }
}

impl StorageError {
    /// Create a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
