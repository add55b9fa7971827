//! Path filtering for the watched corpus.
//!
//! A file is included when its extension is on the allow-list, no exclude
//! substring occurs in its path, and no configured ignore glob matches.

use std::path::{Component, Path, PathBuf};

use globset::Glob;
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::config::Config;
use crate::error::WatcherError;
use crate::Result;

/// Include/exclude rules rooted at one directory.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    include_extensions: Vec<String>,
    exclude_patterns: Vec<String>,
    ignore: Option<Gitignore>,
}

impl PathFilter {
    /// Create a filter with explicit rules.
    ///
    /// # Errors
    ///
    /// Returns an error if an ignore glob is invalid.
    pub fn new(
        root: impl AsRef<Path>,
        include_extensions: &[String],
        exclude_patterns: &[String],
        ignore_globs: &[String],
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        let ignore = if ignore_globs.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(&root);
            for pattern in ignore_globs {
                // The gitignore parser tolerates some malformed globs
                Glob::new(pattern.trim_start_matches('!')).map_err(|e| {
                    crate::Error::config(format!("invalid ignore glob '{pattern}': {e}"))
                })?;
                builder
                    .add_line(None, pattern)
                    .map_err(|e| crate::Error::config(format!("invalid pattern: {e}")))?;
            }
            Some(
                builder
                    .build()
                    .map_err(|e| crate::Error::config(format!("failed to build ignore set: {e}")))?,
            )
        };

        Ok(Self {
            root,
            include_extensions: include_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            exclude_patterns: exclude_patterns.to_vec(),
            ignore,
        })
    }

    /// Create a filter for the corpus root from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an ignore glob is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.corpus_root,
            &config.include_extensions,
            &config.exclude_patterns,
            &config.ignore_globs,
        )
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check whether a path should be tracked. Does not touch the filesystem.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        if !self.has_included_extension(path) {
            return false;
        }

        if self.is_excluded(path) {
            return false;
        }

        if let Some(ref gi) = self.ignore {
            if path.starts_with(&self.root)
                && gi.matched_path_or_any_parents(path, false).is_ignore()
            {
                return false;
            }
        }

        true
    }

    /// Check the extension against the allow-list.
    #[must_use]
    pub fn has_included_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let dotted = format!(".{}", ext.to_lowercase());
                self.include_extensions.iter().any(|e| *e == dotted)
            })
    }

    /// Check the path below the root against the exclude substrings.
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path_str = path.strip_prefix(&self.root).unwrap_or(path).to_string_lossy();
        self.exclude_patterns
            .iter()
            .any(|pattern| path_str.contains(pattern.as_str()))
    }

    /// Whether a directory should be pruned from a walk.
    #[must_use]
    pub fn is_excluded_dir(&self, path: &Path) -> bool {
        if path == self.root {
            return false;
        }

        if let Some(ref gi) = self.ignore {
            if path.starts_with(&self.root)
                && gi.matched_path_or_any_parents(path, true).is_ignore()
            {
                return true;
            }
        }

        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.exclude_patterns.iter().any(|p| p == name))
    }

    /// Path relative to the root, `/`-separated.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not under the root.
    pub fn relative_path(&self, path: &Path) -> Result<String> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| WatcherError::OutsideRoot {
                path: path.display().to_string(),
                root: self.root.display().to_string(),
            })?;

        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        Ok(parts.join("/"))
    }

    /// Absolute path for a root-relative path.
    #[must_use]
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}
