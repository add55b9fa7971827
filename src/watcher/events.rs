//! File system event types and batching.

#![allow(clippy::missing_const_for_fn)]

use std::path::{Path, PathBuf};

/// Change to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// File was created or modified.
    Modified(PathBuf),
    /// File was deleted.
    Deleted(PathBuf),
}

impl FileEvent {
    /// Classify a debounced notification by what is on disk now.
    ///
    /// Debounced events carry no kind, so an existing path counts as a
    /// change and a missing one as a delete. Returns `None` for directories.
    #[must_use]
    pub fn classify(path: PathBuf) -> Option<Self> {
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => None,
            Ok(_) => Some(Self::Modified(path)),
            Err(_) => Some(Self::Deleted(path)),
        }
    }

    /// Get the path associated with this event.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Modified(p) | Self::Deleted(p) => p,
        }
    }
}

/// Batch of file events for processing. Each path appears at most once;
/// the latest event for a path wins.
#[derive(Debug, Default)]
pub struct EventBatch {
    /// Created or modified files.
    pub modified: Vec<PathBuf>,
    /// Deleted files.
    pub deleted: Vec<PathBuf>,
}

impl EventBatch {
    /// Create a new empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event to the batch.
    pub fn add(&mut self, event: FileEvent) {
        match event {
            FileEvent::Modified(path) => {
                self.deleted.retain(|p| p != &path);
                if !self.modified.contains(&path) {
                    self.modified.push(path);
                }
            }
            FileEvent::Deleted(path) => {
                self.modified.retain(|p| p != &path);
                if !self.deleted.contains(&path) {
                    self.deleted.push(path);
                }
            }
        }
    }

    /// Keep only paths accepted by `keep`.
    pub fn retain(&mut self, keep: impl Fn(&Path) -> bool) {
        self.modified.retain(|p| keep(p));
        self.deleted.retain(|p| keep(p));
    }

    /// Check if batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Get total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modified.len() + self.deleted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.md");
        std::fs::write(&file, "x").unwrap();

        assert_eq!(
            FileEvent::classify(file.clone()),
            Some(FileEvent::Modified(file))
        );

        let gone = tmp.path().join("gone.md");
        assert_eq!(
            FileEvent::classify(gone.clone()),
            Some(FileEvent::Deleted(gone))
        );

        assert_eq!(FileEvent::classify(tmp.path().to_path_buf()), None);
    }

    #[test]
    fn test_event_batch_dedups_modified() {
        let mut batch = EventBatch::new();
        batch.add(FileEvent::Modified(PathBuf::from("/a.md")));
        batch.add(FileEvent::Modified(PathBuf::from("/b.md")));
        batch.add(FileEvent::Modified(PathBuf::from("/a.md")));

        assert_eq!(batch.modified.len(), 2);
        assert!(batch.deleted.is_empty());
    }

    #[test]
    fn test_event_batch_latest_event_wins() {
        let mut batch = EventBatch::new();
        batch.add(FileEvent::Modified(PathBuf::from("/a.md")));
        batch.add(FileEvent::Deleted(PathBuf::from("/a.md")));
        assert!(batch.modified.is_empty());
        assert_eq!(batch.deleted.len(), 1);

        batch.add(FileEvent::Modified(PathBuf::from("/a.md")));
        assert_eq!(batch.modified.len(), 1);
        assert!(batch.deleted.is_empty());
    }

    #[test]
    fn test_event_batch_retain_and_len() {
        let mut batch = EventBatch::new();
        assert!(batch.is_empty());

        batch.add(FileEvent::Modified(PathBuf::from("/root/a.md")));
        batch.add(FileEvent::Deleted(PathBuf::from("/other/b.md")));
        assert_eq!(batch.len(), 2);

        batch.retain(|p| p.starts_with("/root"));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.modified, vec![PathBuf::from("/root/a.md")]);
    }
}
