//! docindex
//!
//! Content-addressed document indexing pipeline. A change detector
//! fingerprints the corpus and queues work, a durable SQLite queue hands it
//! off, and an indexing worker chunks, embeds and stores vectors while
//! keeping the index in step with the files.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod embeddings;
pub mod error;
pub mod observability;
pub mod storage;
pub mod vector;
pub mod watcher;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
