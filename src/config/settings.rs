//! Configuration settings and validation.

use crate::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Which embedding backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// OpenAI-compatible HTTP endpoint.
    Http,
    /// Deterministic local hash vectors (offline runs).
    Hash,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "http" | "openai" => Ok(Self::Http),
            "hash" => Ok(Self::Hash),
            other => Err(Error::config(format!(
                "unsupported embedding backend '{other}', must be one of: http, hash"
            ))),
        }
    }
}

/// Main configuration for docindex.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the metadata and vector databases.
    pub data_dir: PathBuf,

    /// Root of the watched document corpus.
    pub corpus_root: PathBuf,

    /// Root of user-uploaded documents, if that source is enabled.
    pub upload_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// File extensions to index, with leading dot.
    pub include_extensions: Vec<String>,

    /// Path substrings that exclude a file.
    pub exclude_patterns: Vec<String>,

    /// Extra gitignore-style globs that exclude a file.
    pub ignore_globs: Vec<String>,

    /// Debounce window for filesystem events.
    pub watch_debounce: Duration,

    /// Jobs claimed per poll; also the worker's parallelism.
    pub batch_size: usize,

    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,

    /// Attempts per job before it is marked failed.
    pub max_retries: u32,

    /// Base delay for exponential retry backoff. Zero requeues immediately.
    pub retry_backoff: Duration,

    /// Age after which a `processing` job is considered orphaned.
    pub stale_job_timeout: Duration,

    /// Target chunk size in characters.
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,

    /// Embedding backend selection.
    pub embedding_backend: EmbeddingBackend,

    /// Base URL of the embedding service.
    pub embedding_url: String,

    /// Embedding model name.
    pub embedding_model: String,

    /// Bearer token for the embedding service.
    pub embedding_api_key: Option<String>,

    /// Embedding vector dimension.
    pub embedding_dimension: usize,

    /// Per-request timeout for the embedding service.
    pub embedding_timeout: Duration,

    /// Vector index collection name.
    pub collection: String,

    /// Address for the `/metrics` endpoint of long-running commands.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            corpus_root: PathBuf::from("./corpus"),
            upload_root: None,
            log_level: "info".to_string(),
            include_extensions: vec![".md".to_string(), ".txt".to_string()],
            exclude_patterns: [
                ".git",
                "__pycache__",
                ".DS_Store",
                "node_modules",
                ".pytest_cache",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            ignore_globs: Vec::new(),
            watch_debounce: Duration::from_millis(500),
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::ZERO,
            stale_job_timeout: Duration::from_secs(600),
            chunk_size: 512,
            chunk_overlap: 50,
            embedding_backend: EmbeddingBackend::Http,
            embedding_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_api_key: None,
            embedding_dimension: 1536,
            embedding_timeout: Duration::from_secs(30),
            collection: "documents".to_string(),
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.include_extensions.is_empty() {
            return Err(Error::config("include_extensions cannot be empty"));
        }

        if let Some(ext) = self.include_extensions.iter().find(|e| !e.starts_with('.')) {
            return Err(Error::config(format!(
                "extension '{ext}' must start with a dot"
            )));
        }

        if self.batch_size == 0 {
            return Err(Error::config("batch_size cannot be 0"));
        }

        if self.batch_size > 64 {
            return Err(Error::config("batch_size cannot exceed 64"));
        }

        if self.max_retries == 0 {
            return Err(Error::config("max_retries cannot be 0"));
        }

        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size cannot be 0"));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }

        if self.embedding_dimension == 0 {
            return Err(Error::config("embedding_dimension cannot be 0"));
        }

        if self.embedding_backend == EmbeddingBackend::Http && self.embedding_url.is_empty() {
            return Err(Error::config("embedding_url cannot be empty"));
        }

        if self.collection.is_empty() {
            return Err(Error::config("collection cannot be empty"));
        }

        Ok(())
    }

    /// Check that the corpus root exists and is a directory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if it is missing.
    pub fn check_roots(&self) -> Result<()> {
        if !self.corpus_root.is_dir() {
            return Err(Error::config(format!(
                "corpus root '{}' does not exist or is not a directory",
                self.corpus_root.display()
            )));
        }
        if let Some(ref upload_root) = self.upload_root {
            if !upload_root.is_dir() {
                return Err(Error::config(format!(
                    "upload root '{}' does not exist or is not a directory",
                    upload_root.display()
                )));
            }
        }
        Ok(())
    }

    /// Get the path to the metadata database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("docindex.db")
    }

    /// Get the path to the vector index database file.
    #[must_use]
    pub fn vector_database_path(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }
}
