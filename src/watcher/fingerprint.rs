//! Content fingerprints and the in-memory fingerprint cache.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::UNIX_EPOCH;

use blake3::Hasher;
use parking_lot::Mutex;

use crate::error::WatcherError;
use crate::storage::DocumentKind;
use crate::Result;

/// Hash, size and modification time of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// blake3 hex digest of the raw bytes.
    pub hash: String,
    pub size: i64,
    /// Unix seconds.
    pub modified_at: i64,
}

/// Hash raw bytes.
#[must_use]
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Stat and hash a file, streaming its contents.
///
/// # Errors
///
/// Returns `WatcherError::Fingerprint` if the file cannot be read.
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let fail = |reason: String| WatcherError::Fingerprint {
        path: path.display().to_string(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| fail(e.to_string()))?;
    if !metadata.is_file() {
        return Err(fail("not a regular file".to_string()).into());
    }

    let modified_at = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(0));

    let file = File::open(path).map_err(|e| fail(e.to_string()))?;
    let mut hasher = Hasher::new();
    std::io::copy(&mut BufReader::new(file), &mut hasher).map_err(|e| fail(e.to_string()))?;

    Ok(Fingerprint {
        hash: hasher.finalize().to_hex().to_string(),
        size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
        modified_at,
    })
}

/// Last fingerprint seen per path.
///
/// Only short-circuits duplicate notifications; on a miss the metadata
/// store decides.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: Mutex<HashMap<(DocumentKind, String), String>>,
}

impl FingerprintCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `hash` is the cached fingerprint for the path.
    #[must_use]
    pub fn is_current(&self, kind: DocumentKind, path: &str, hash: &str) -> bool {
        self.entries
            .lock()
            .get(&(kind, path.to_string()))
            .is_some_and(|cached| cached == hash)
    }

    pub fn insert(&self, kind: DocumentKind, path: &str, hash: &str) {
        self.entries
            .lock()
            .insert((kind, path.to_string()), hash.to_string());
    }

    pub fn remove(&self, kind: DocumentKind, path: &str) {
        self.entries.lock().remove(&(kind, path.to_string()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
