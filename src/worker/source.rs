//! Document sources.
//!
//! Each [`DocumentKind`] maps to one [`DocumentSource`] variant that knows
//! where the bytes live and how to derive metadata from a path.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::IndexingError;
use crate::storage::{DocumentKind, DocumentMetadata};
use crate::Result;

/// Content read from a source, with the fingerprint of exactly those bytes.
#[derive(Debug, Clone)]
pub struct LoadedContent {
    pub text: String,
    pub content_hash: String,
    pub size: i64,
}

/// Where documents of one kind are read from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// The watched corpus.
    Corpus { root: PathBuf },
    /// User uploads; `None` when no upload root is configured.
    Upload { root: Option<PathBuf> },
}

impl DocumentSource {
    /// Source for a document kind.
    #[must_use]
    pub fn for_kind(kind: DocumentKind, config: &Config) -> Self {
        match kind {
            DocumentKind::Corpus => Self::Corpus {
                root: config.corpus_root.clone(),
            },
            DocumentKind::UserUpload => Self::Upload {
                root: config.upload_root.clone(),
            },
        }
    }

    /// Document kind served.
    #[must_use]
    pub const fn kind(&self) -> DocumentKind {
        match self {
            Self::Corpus { .. } => DocumentKind::Corpus,
            Self::Upload { .. } => DocumentKind::UserUpload,
        }
    }

    fn root(&self) -> Result<&Path> {
        match self {
            Self::Corpus { root } | Self::Upload { root: Some(root) } => Ok(root),
            Self::Upload { root: None } => {
                Err(IndexingError::SourceUnavailable(self.kind().to_string()).into())
            }
        }
    }

    /// Read a document's text and fingerprint the bytes read.
    ///
    /// # Errors
    ///
    /// Returns `IndexingError::FileMissing` if the file is gone,
    /// `IndexingError::UnreadableContent` if it is not UTF-8, and
    /// `IndexingError::SourceUnavailable` if the source has no root.
    pub async fn load_content(&self, relative_path: &str) -> Result<LoadedContent> {
        let full_path = relative_path
            .split('/')
            .fold(self.root()?.to_path_buf(), |acc, part| acc.join(part));

        let bytes = match tokio::fs::read(&full_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexingError::FileMissing(full_path.display().to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %relative_path, size = bytes.len(), "Read document");

        let content_hash = crate::watcher::fingerprint_bytes(&bytes);
        let size = i64::try_from(bytes.len()).unwrap_or(i64::MAX);
        let text = String::from_utf8(bytes).map_err(|e| IndexingError::UnreadableContent {
            path: relative_path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(LoadedContent {
            text,
            content_hash,
            size,
        })
    }

    /// Category and tags for a document.
    #[must_use]
    pub fn derive_metadata(&self, relative_path: &str) -> DocumentMetadata {
        match self {
            Self::Corpus { .. } => corpus_metadata(relative_path),
            Self::Upload { .. } => DocumentMetadata::new("user-upload", &["user-upload"]),
        }
    }
}

/// Metadata from the corpus layout: the first path segment selects a
/// bucket, and for some buckets the second segment names the category.
fn corpus_metadata(relative_path: &str) -> DocumentMetadata {
    let parts: Vec<&str> = relative_path.split('/').filter(|p| !p.is_empty()).collect();

    match parts.as_slice() {
        ["curated-datasets", category, ..] => DocumentMetadata::new(*category, &["curated-dataset"]),
        ["custom-instructions", _, ..] => {
            DocumentMetadata::new("custom-instructions", &["custom-instruction"])
        }
        ["prompt-library", category, ..] => DocumentMetadata::new(*category, &["prompt-library"]),
        _ => DocumentMetadata::new("unknown", &[]),
    }
}
