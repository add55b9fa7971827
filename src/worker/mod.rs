//! Indexing worker.
//!
//! This module provides:
//! - Recursive character chunking
//! - Document sources dispatched by kind
//! - The per-job pipeline and batch poll loop
//! - Manual re-index triggers and the tombstone sweep

mod chunker;
mod indexer;
mod reindex;
mod source;
mod sweep;

pub use chunker::{Chunker, ChunkerConfig, DEFAULT_SEPARATORS};
pub use indexer::{BatchReport, IndexingWorker, JobOutcome, WorkerSettings, EMPTY_DOCUMENT_NOTE};
pub use reindex::{reindex_all, reindex_document};
pub use source::{DocumentSource, LoadedContent};
pub use sweep::sweep_deleted;
