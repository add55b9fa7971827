//! Corpus walker for startup reconciliation.

use std::path::PathBuf;

use ignore::WalkBuilder;

use super::filter::PathFilter;

/// Result of walking the corpus.
#[derive(Debug, Default)]
pub struct WalkResult {
    /// Files accepted by the filter, sorted.
    pub files: Vec<PathBuf>,
    /// Files seen but rejected by the filter.
    pub skipped: u64,
    /// Walk errors (unreadable directories and the like).
    pub errors: u64,
}

/// Walk the filter's root and collect every matching file.
///
/// Excluded directories are pruned rather than descended into. The
/// `ignore` crate's own gitignore/hidden handling is turned off; only the
/// configured rules apply.
#[must_use]
pub fn walk_corpus(filter: &PathFilter) -> WalkResult {
    let mut result = WalkResult::default();

    tracing::info!(path = %filter.root().display(), "Starting corpus walk");

    let prune = filter.clone();
    let walker = WalkBuilder::new(filter.root())
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && prune.is_excluded_dir(entry.path()))
        })
        .build();

    for entry in walker {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }

                if filter.matches(entry.path()) {
                    result.files.push(entry.into_path());
                } else {
                    result.skipped += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error walking corpus");
                result.errors += 1;
            }
        }
    }

    result.files.sort();

    tracing::info!(
        path = %filter.root().display(),
        found = result.files.len(),
        skipped = result.skipped,
        errors = result.errors,
        "Corpus walk complete"
    );

    result
}
