//! Change detection for the corpus.
//!
//! This module provides:
//! - Directory watching using notify-rs
//! - Path filtering and corpus walking
//! - Content fingerprinting
//! - The change detector that records fingerprints and queues work

mod detector;
mod events;
mod filter;
mod fingerprint;
mod scanner;
#[allow(clippy::module_inception)]
mod watcher;

pub use detector::{ChangeDetector, ChangeOutcome, DetectorStats};
pub use events::{EventBatch, FileEvent};
pub use filter::PathFilter;
pub use fingerprint::{fingerprint_bytes, fingerprint_file, Fingerprint, FingerprintCache};
pub use scanner::{walk_corpus, WalkResult};
pub use watcher::FileWatcher;
