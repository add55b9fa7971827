//! Embedding generation.
//!
//! This module provides:
//! - The [`Embedder`] trait the indexing worker calls with one batch per document
//! - An HTTP client for OpenAI-compatible `/embeddings` endpoints
//! - A deterministic hash embedder for offline runs and tests

mod hash;
mod http;

pub use hash::{hash_embedding, HashEmbedder};
pub use http::HttpEmbedder;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, EmbeddingBackend};
use crate::error::EmbeddingError;
use crate::Result;

/// Text embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimension.
    fn dimension(&self) -> usize;

    /// Model name.
    fn model_name(&self) -> &str;

    /// Confirm the service answers with vectors of the expected dimension.
    async fn health_check(&self) -> Result<()> {
        let vectors = self.embed(vec!["health check".to_string()]).await?;
        match vectors.first() {
            Some(v) if v.len() == self.dimension() => Ok(()),
            Some(v) => Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension(),
                actual: v.len(),
            }
            .into()),
            None => Err(EmbeddingError::InvalidResponse("no vectors returned".to_string()).into()),
        }
    }
}

/// Create an embedder based on configuration.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedding_backend {
        EmbeddingBackend::Http => {
            let embedder = HttpEmbedder::new(
                &config.embedding_url,
                &config.embedding_model,
                config.embedding_api_key.clone(),
                config.embedding_dimension,
                config.embedding_timeout,
            )?;
            Ok(Arc::new(embedder))
        }
        EmbeddingBackend::Hash => Ok(Arc::new(HashEmbedder::new(config.embedding_dimension))),
    }
}
