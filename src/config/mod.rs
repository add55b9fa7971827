//! Configuration management for docindex.
//!
//! Settings come from command-line arguments, falling back to `DOCINDEX_*`
//! environment variables and then to built-in defaults.

mod settings;

pub use settings::{Config, EmbeddingBackend};
