//! Change detector: keeps document records truthful relative to the corpus.
//!
//! The detector only writes document records and queue jobs. It never
//! touches the vector index and never waits on the worker.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::events::EventBatch;
use super::filter::PathFilter;
use super::fingerprint::{fingerprint_file, Fingerprint, FingerprintCache};
use super::scanner::walk_corpus;
use super::watcher::FileWatcher;
use crate::observability::metrics;
use crate::storage::{
    enqueue, get_document_by_path, insert_document, list_active_paths, mark_deleted,
    update_fingerprint, Database, DocumentKind, DocumentRecord, PRIORITY_BACKGROUND,
    PRIORITY_CHANGE,
};
use crate::Result;

/// What happened to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// New record inserted and a job queued.
    Created { document_id: String, job_id: i64 },
    /// Fingerprint changed (or tombstone revived); record reset and a job queued.
    Modified { document_id: String, job_id: i64 },
    /// Content identical to what is recorded.
    Unchanged,
    /// Record tombstoned.
    Deleted { document_id: String },
    /// Directory removed; every tracked document below it was tombstoned.
    DeletedTree { documents: u64 },
    /// Path not tracked (filtered out, or deleted before it was recorded).
    Skipped,
}

impl ChangeOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Modified { .. } => "modified",
            Self::Unchanged => "unchanged",
            Self::Deleted { .. } | Self::DeletedTree { .. } => "deleted",
            Self::Skipped => "skipped",
        }
    }

    /// Whether a job was queued.
    #[must_use]
    pub const fn enqueued(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Modified { .. })
    }
}

/// Counts from one reconciliation pass or event batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DetectorStats {
    pub created: u64,
    pub modified: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl DetectorStats {
    fn record(&mut self, outcome: &ChangeOutcome) {
        match outcome {
            ChangeOutcome::Created { .. } => self.created += 1,
            ChangeOutcome::Modified { .. } => self.modified += 1,
            ChangeOutcome::Unchanged => self.unchanged += 1,
            ChangeOutcome::Deleted { .. } => self.deleted += 1,
            ChangeOutcome::DeletedTree { documents } => self.deleted += documents,
            ChangeOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Jobs queued.
    #[must_use]
    pub const fn enqueued(&self) -> u64 {
        self.created + self.modified
    }
}

/// Change detector for the corpus source.
#[derive(Debug)]
pub struct ChangeDetector {
    db: Database,
    filter: PathFilter,
    cache: FingerprintCache,
    max_retries: u32,
}

impl ChangeDetector {
    /// Create a detector. `max_retries` is stamped on every queued job.
    #[must_use]
    pub fn new(db: Database, filter: PathFilter, max_retries: u32) -> Self {
        Self {
            db,
            filter,
            cache: FingerprintCache::new(),
            max_retries,
        }
    }

    /// Path filter in use.
    #[must_use]
    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Fingerprint cache, for inspection.
    #[must_use]
    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    /// Handle a created or modified file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be fingerprinted or the store
    /// update fails.
    pub fn handle_change(&self, path: &Path, priority: i64) -> Result<ChangeOutcome> {
        if !self.filter.matches(path) {
            return Ok(ChangeOutcome::Skipped);
        }

        let relative = self.filter.relative_path(path)?;
        let fingerprint = fingerprint_file(path)?;

        if self
            .cache
            .is_current(DocumentKind::Corpus, &relative, &fingerprint.hash)
        {
            tracing::debug!(path = %relative, "Fingerprint cached, skipping");
            return Ok(ChangeOutcome::Unchanged);
        }

        let outcome = self.record_fingerprint(&relative, &fingerprint, priority)?;
        self.cache
            .insert(DocumentKind::Corpus, &relative, &fingerprint.hash);

        metrics::record_change(outcome.label());
        match &outcome {
            ChangeOutcome::Created { document_id, .. } => tracing::info!(
                path = %relative,
                document_id = %document_id,
                size = fingerprint.size,
                "New document queued"
            ),
            ChangeOutcome::Modified { document_id, .. } => tracing::info!(
                path = %relative,
                document_id = %document_id,
                hash = %&fingerprint.hash[..16],
                "Changed document queued"
            ),
            _ => tracing::debug!(path = %relative, "Document unchanged"),
        }

        Ok(outcome)
    }

    /// Compare against the store and write the record plus job atomically.
    fn record_fingerprint(
        &self,
        relative: &str,
        fingerprint: &Fingerprint,
        priority: i64,
    ) -> Result<ChangeOutcome> {
        self.db.with_transaction(|conn| {
            match get_document_by_path(conn, DocumentKind::Corpus, relative)? {
                Some(existing)
                    if existing.content_hash == fingerprint.hash && !existing.is_deleted() =>
                {
                    Ok(ChangeOutcome::Unchanged)
                }
                Some(existing) => {
                    update_fingerprint(
                        conn,
                        &existing.id,
                        &fingerprint.hash,
                        fingerprint.size,
                        fingerprint.modified_at,
                    )?;
                    let job_id = enqueue(
                        conn,
                        DocumentKind::Corpus,
                        &existing.id,
                        priority,
                        self.max_retries,
                    )?;
                    Ok(ChangeOutcome::Modified {
                        document_id: existing.id,
                        job_id,
                    })
                }
                None => {
                    let record = DocumentRecord::new(
                        DocumentKind::Corpus,
                        relative,
                        &fingerprint.hash,
                        fingerprint.size,
                        fingerprint.modified_at,
                    );
                    insert_document(conn, &record)?;
                    let job_id = enqueue(
                        conn,
                        DocumentKind::Corpus,
                        &record.id,
                        priority,
                        self.max_retries,
                    )?;
                    Ok(ChangeOutcome::Created {
                        document_id: record.id,
                        job_id,
                    })
                }
            }
        })
    }

    /// Handle a deleted file: tombstone its record. No job is queued.
    ///
    /// A path that is not itself trackable may be a directory that was
    /// removed or moved out of the root; its tracked documents are
    /// tombstoned instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails.
    pub fn handle_delete(&self, path: &Path) -> Result<ChangeOutcome> {
        if !self.filter.matches(path) {
            return self.tombstone_tree(path);
        }

        let relative = self.filter.relative_path(path)?;
        self.cache.remove(DocumentKind::Corpus, &relative);

        let outcome = self.tombstone(&relative)?;
        metrics::record_change(outcome.label());

        match &outcome {
            ChangeOutcome::Deleted { .. } => {
                tracing::info!(path = %relative, "Document marked deleted");
            }
            _ => tracing::debug!(path = %relative, "Deleted file was not tracked"),
        }

        Ok(outcome)
    }

    fn tombstone_tree(&self, path: &Path) -> Result<ChangeOutcome> {
        if self.filter.is_excluded(path) {
            return Ok(ChangeOutcome::Skipped);
        }
        let Ok(relative) = self.filter.relative_path(path) else {
            return Ok(ChangeOutcome::Skipped);
        };
        if relative.is_empty() {
            return Ok(ChangeOutcome::Skipped);
        }

        let prefix = format!("{relative}/");
        let documents = self.db.with_transaction(|conn| {
            let mut documents = 0;
            for (id, doc_path) in list_active_paths(conn, DocumentKind::Corpus)? {
                if !doc_path.starts_with(&prefix) {
                    continue;
                }
                // Recreated in the meantime; the watcher reports it as a change
                if self.filter.absolute_path(&doc_path).exists() {
                    continue;
                }
                if mark_deleted(conn, &id)? {
                    self.cache.remove(DocumentKind::Corpus, &doc_path);
                    documents += 1;
                }
            }
            Ok(documents)
        })?;

        if documents == 0 {
            return Ok(ChangeOutcome::Skipped);
        }

        for _ in 0..documents {
            metrics::record_change("deleted");
        }
        tracing::info!(path = %relative, documents, "Directory removed, documents marked deleted");

        Ok(ChangeOutcome::DeletedTree { documents })
    }

    fn tombstone(&self, relative: &str) -> Result<ChangeOutcome> {
        self.db.with_conn(|conn| {
            match get_document_by_path(conn, DocumentKind::Corpus, relative)? {
                Some(existing) if mark_deleted(conn, &existing.id)? => Ok(ChangeOutcome::Deleted {
                    document_id: existing.id,
                }),
                Some(_) => Ok(ChangeOutcome::Unchanged),
                None => Ok(ChangeOutcome::Skipped),
            }
        })
    }

    /// Walk the corpus and bring the store up to date at background priority.
    ///
    /// Records whose files were not seen are tombstoned. A file that fails
    /// to fingerprint is logged and skipped but still counts as seen.
    ///
    /// # Errors
    ///
    /// Returns an error only if listing existing records fails.
    pub fn reconcile(&self) -> Result<DetectorStats> {
        let walk = walk_corpus(&self.filter);
        let mut stats = DetectorStats {
            errors: walk.errors,
            skipped: walk.skipped,
            ..DetectorStats::default()
        };
        let mut seen = HashSet::with_capacity(walk.files.len());

        for path in &walk.files {
            if let Ok(relative) = self.filter.relative_path(path) {
                seen.insert(relative);
            }

            match self.handle_change(path, PRIORITY_BACKGROUND) {
                Ok(outcome) => stats.record(&outcome),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping file");
                    stats.errors += 1;
                }
            }
        }

        // A failed walk proves nothing about what is gone
        if walk.errors == 0 {
            let active = self
                .db
                .with_conn(|conn| list_active_paths(conn, DocumentKind::Corpus))?;

            for (id, relative) in active {
                if seen.contains(&relative) {
                    continue;
                }
                self.cache.remove(DocumentKind::Corpus, &relative);
                match self.db.with_conn(|conn| mark_deleted(conn, &id)) {
                    Ok(true) => {
                        tracing::info!(path = %relative, "Document missing from corpus, marked deleted");
                        metrics::record_change("deleted");
                        stats.deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(path = %relative, error = %e, "Failed to tombstone");
                        stats.errors += 1;
                    }
                }
            }
        } else {
            tracing::warn!(errors = walk.errors, "Corpus walk incomplete, not tombstoning");
        }

        tracing::info!(
            created = stats.created,
            modified = stats.modified,
            unchanged = stats.unchanged,
            deleted = stats.deleted,
            errors = stats.errors,
            "Reconciliation complete"
        );

        Ok(stats)
    }

    /// Apply one batch of watcher events at change priority.
    ///
    /// Per-path failures are logged and counted, never propagated.
    pub fn apply_batch(&self, batch: &EventBatch) -> DetectorStats {
        let mut stats = DetectorStats::default();

        for path in &batch.modified {
            match self.handle_change(path, PRIORITY_CHANGE) {
                Ok(outcome) => stats.record(&outcome),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to process change");
                    stats.errors += 1;
                }
            }
        }

        for path in &batch.deleted {
            match self.handle_delete(path) {
                Ok(outcome) => stats.record(&outcome),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to process deletion");
                    stats.errors += 1;
                }
            }
        }

        stats
    }

    /// Reconcile the corpus, then consume `watcher` until cancelled.
    ///
    /// The watcher is created by the caller before the walk begins, so
    /// changes made while reconciling queue up in its channel instead of
    /// being missed.
    ///
    /// # Errors
    ///
    /// Returns an error if reconciliation fails or a blocking task panics.
    pub async fn start(
        self: Arc<Self>,
        watcher: FileWatcher,
        cancel: CancellationToken,
    ) -> Result<DetectorStats> {
        let reconciling = Arc::clone(&self);
        let stats = tokio::task::spawn_blocking(move || reconciling.reconcile())
            .await
            .map_err(|e| crate::Error::internal(format!("reconciliation task failed: {e}")))??;

        self.run(watcher, cancel).await?;
        Ok(stats)
    }

    /// Consume watcher batches until cancelled or the watcher closes.
    ///
    /// Store writes run on the blocking pool so the event loop only
    /// dispatches and returns.
    ///
    /// # Errors
    ///
    /// Returns an error if a blocking task panics.
    pub async fn run(self: Arc<Self>, mut watcher: FileWatcher, cancel: CancellationToken) -> Result<()> {
        tracing::info!(root = %watcher.root().display(), "Change detector started");

        loop {
            let batch = tokio::select! {
                () = cancel.cancelled() => break,
                batch = watcher.recv() => match batch {
                    Some(batch) => batch,
                    None => {
                        tracing::warn!("Watcher channel closed");
                        break;
                    }
                },
            };

            let detector = Arc::clone(&self);
            let stats = tokio::task::spawn_blocking(move || detector.apply_batch(&batch))
                .await
                .map_err(|e| crate::Error::internal(format!("detector task failed: {e}")))?;

            if stats.enqueued() > 0 || stats.deleted > 0 {
                tracing::info!(
                    queued = stats.enqueued(),
                    deleted = stats.deleted,
                    errors = stats.errors,
                    "Processed change batch"
                );
            }
        }

        tracing::info!("Change detector stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        get_document, list_jobs_for_document, migrate, DocumentStatus, JobStatus,
    };
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        db: Database,
        detector: ChangeDetector,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| migrate(conn)).unwrap();

        let filter = PathFilter::new(
            &root,
            &[".md".to_string(), ".txt".to_string()],
            &[".git".to_string()],
            &[],
        )
        .unwrap();

        let detector = ChangeDetector::new(db.clone(), filter, 3);
        Fixture {
            _tmp: tmp,
            root,
            db,
            detector,
        }
    }

    fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn jobs_for(db: &Database, document_id: &str) -> usize {
        db.with_conn(|conn| list_jobs_for_document(conn, document_id))
            .unwrap()
            .len()
    }

    #[test]
    fn test_new_file_creates_record_and_job() {
        let fx = fixture();
        let path = write(&fx.root, "a/b.md", "hello");

        let outcome = fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap();
        let ChangeOutcome::Created { document_id, job_id } = outcome else {
            panic!("expected Created, got {outcome:?}");
        };

        let doc = fx
            .db
            .with_conn(|conn| get_document(conn, &document_id))
            .unwrap()
            .unwrap();
        assert_eq!(doc.path, "a/b.md");
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.size, 5);

        let jobs = fx
            .db
            .with_conn(|conn| list_jobs_for_document(conn, &document_id))
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job_id);
        assert_eq!(jobs[0].priority, PRIORITY_CHANGE);
        assert_eq!(jobs[0].status, JobStatus::Pending);
    }

    #[test]
    fn test_duplicate_notification_short_circuits() {
        let fx = fixture();
        let path = write(&fx.root, "a.md", "hello");

        let first = fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap();
        assert!(first.enqueued());

        let second = fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap();
        assert_eq!(second, ChangeOutcome::Unchanged);

        let ChangeOutcome::Created { document_id, .. } = first else {
            panic!("expected Created");
        };
        assert_eq!(jobs_for(&fx.db, &document_id), 1);
    }

    #[test]
    fn test_cache_miss_falls_back_to_store() {
        let fx = fixture();
        let path = write(&fx.root, "a.md", "hello");
        fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap();

        // Fresh detector: empty cache, same store
        let filter = fx.detector.filter().clone();
        let restarted = ChangeDetector::new(fx.db.clone(), filter, 3);
        assert!(restarted.cache().is_empty());

        let outcome = restarted.handle_change(&path, PRIORITY_CHANGE).unwrap();
        assert_eq!(outcome, ChangeOutcome::Unchanged);
        assert_eq!(restarted.cache().len(), 1);
    }

    #[test]
    fn test_modified_content_resets_and_requeues() {
        let fx = fixture();
        let path = write(&fx.root, "a.md", "h1");
        let ChangeOutcome::Created { document_id, .. } =
            fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap()
        else {
            panic!("expected Created");
        };

        write(&fx.root, "a.md", "h2 content");
        let outcome = fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap();
        assert!(matches!(&outcome, ChangeOutcome::Modified { document_id: id, .. } if *id == document_id));

        let doc = fx
            .db
            .with_conn(|conn| get_document(conn, &document_id))
            .unwrap()
            .unwrap();
        assert_eq!(doc.size, 10);
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(jobs_for(&fx.db, &document_id), 2);
    }

    #[test]
    fn test_filtered_paths_skipped() {
        let fx = fixture();
        let png = write(&fx.root, "image.png", "x");
        let git = write(&fx.root, ".git/notes.md", "x");

        assert_eq!(
            fx.detector.handle_change(&png, PRIORITY_CHANGE).unwrap(),
            ChangeOutcome::Skipped
        );
        assert_eq!(
            fx.detector.handle_change(&git, PRIORITY_CHANGE).unwrap(),
            ChangeOutcome::Skipped
        );
    }

    #[test]
    fn test_delete_tombstones_without_job() {
        let fx = fixture();
        let path = write(&fx.root, "a.md", "hello");
        let ChangeOutcome::Created { document_id, .. } =
            fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap()
        else {
            panic!("expected Created");
        };

        fs::remove_file(&path).unwrap();
        let outcome = fx.detector.handle_delete(&path).unwrap();
        assert_eq!(
            outcome,
            ChangeOutcome::Deleted {
                document_id: document_id.clone()
            }
        );
        assert!(fx.detector.cache().is_empty());

        let doc = fx
            .db
            .with_conn(|conn| get_document(conn, &document_id))
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Deleted);
        assert_eq!(jobs_for(&fx.db, &document_id), 1);

        // Repeat delete is a no-op
        assert_eq!(
            fx.detector.handle_delete(&path).unwrap(),
            ChangeOutcome::Unchanged
        );
    }

    #[test]
    fn test_delete_untracked_is_skipped() {
        let fx = fixture();
        let path = fx.root.join("never-seen.md");
        assert_eq!(
            fx.detector.handle_delete(&path).unwrap(),
            ChangeOutcome::Skipped
        );
    }

    #[test]
    fn test_removed_directory_tombstones_documents_below_it() {
        let fx = fixture();
        let inside = [
            write(&fx.root, "notes/a.md", "alpha"),
            write(&fx.root, "notes/deep/b.txt", "beta"),
        ];
        let sibling = write(&fx.root, "notes-archive/c.md", "gamma");
        for path in inside.iter().chain([&sibling]) {
            fx.detector.handle_change(path, PRIORITY_CHANGE).unwrap();
        }

        // A directory moved out of the root is reported only by its own path
        fs::remove_dir_all(fx.root.join("notes")).unwrap();

        let mut batch = EventBatch::new();
        batch.add(crate::watcher::FileEvent::Deleted(fx.root.join("notes")));
        let stats = fx.detector.apply_batch(&batch);
        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.errors, 0);

        let status = |relative: &str| {
            fx.db
                .with_conn(|conn| get_document_by_path(conn, DocumentKind::Corpus, relative))
                .unwrap()
                .unwrap()
                .status
        };
        assert_eq!(status("notes/a.md"), DocumentStatus::Deleted);
        assert_eq!(status("notes/deep/b.txt"), DocumentStatus::Deleted);
        assert_eq!(status("notes-archive/c.md"), DocumentStatus::Pending);

        // Second notification is a no-op
        assert_eq!(
            fx.detector.handle_delete(&fx.root.join("notes")).unwrap(),
            ChangeOutcome::Skipped
        );
    }

    #[test]
    fn test_reappearing_tombstone_is_requeued() {
        let fx = fixture();
        let path = write(&fx.root, "a.md", "same");
        fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap();

        fs::remove_file(&path).unwrap();
        fx.detector.handle_delete(&path).unwrap();

        write(&fx.root, "a.md", "same");
        let outcome = fx.detector.handle_change(&path, PRIORITY_CHANGE).unwrap();
        assert!(matches!(outcome, ChangeOutcome::Modified { .. }));
    }

    #[test]
    fn test_unreadable_file_errors() {
        let fx = fixture();
        let path = fx.root.join("missing.md");
        assert!(fx.detector.handle_change(&path, PRIORITY_CHANGE).is_err());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let fx = fixture();
        write(&fx.root, "a/b.md", "one");
        write(&fx.root, "c.txt", "two");
        write(&fx.root, "skip.png", "three");

        let first = fx.detector.reconcile().unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.skipped, 1);

        let second = fx.detector.reconcile().unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.modified, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.enqueued(), 0);
    }

    #[test]
    fn test_reconcile_uses_background_priority_and_tombstones_missing() {
        let fx = fixture();
        let keep = write(&fx.root, "keep.md", "k");
        let gone = write(&fx.root, "gone.md", "g");

        fx.detector.reconcile().unwrap();
        fs::remove_file(&gone).unwrap();

        // Restart: cache is cold
        let restarted = ChangeDetector::new(fx.db.clone(), fx.detector.filter().clone(), 3);
        let stats = restarted.reconcile().unwrap();
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.unchanged, 1);

        let keep_doc = fx
            .db
            .with_conn(|conn| {
                get_document_by_path(conn, DocumentKind::Corpus, "keep.md")
            })
            .unwrap()
            .unwrap();
        let jobs = fx
            .db
            .with_conn(|conn| list_jobs_for_document(conn, &keep_doc.id))
            .unwrap();
        assert_eq!(jobs[0].priority, PRIORITY_BACKGROUND);
        assert!(keep.exists());

        let gone_doc = fx
            .db
            .with_conn(|conn| get_document_by_path(conn, DocumentKind::Corpus, "gone.md"))
            .unwrap()
            .unwrap();
        assert_eq!(gone_doc.status, DocumentStatus::Deleted);
    }

    #[test]
    fn test_apply_batch() {
        let fx = fixture();
        let a = write(&fx.root, "a.md", "a");
        let b = write(&fx.root, "b.md", "b");
        fx.detector.handle_change(&b, PRIORITY_CHANGE).unwrap();
        fs::remove_file(&b).unwrap();

        let batch = EventBatch {
            modified: vec![a, fx.root.join("vanished.md")],
            deleted: vec![b],
        };

        let stats = fx.detector.apply_batch(&batch);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let fx = fixture();
        let watcher = FileWatcher::new(&fx.root, std::time::Duration::from_millis(50)).unwrap();
        let cancel = CancellationToken::new();

        cancel.cancel();
        Arc::new(fx.detector).run(watcher, cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_picks_up_changes_after_reconcile() {
        let fx = fixture();
        write(&fx.root, "early.md", "before start");
        let watcher = FileWatcher::new(&fx.root, std::time::Duration::from_millis(50)).unwrap();
        let cancel = CancellationToken::new();
        let db = fx.db.clone();
        let root = fx.root.clone();

        let driver = async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            write(&root, "late.md", "after reconcile");

            let mut found = None;
            for _ in 0..100 {
                found = db
                    .with_conn(|conn| get_document_by_path(conn, DocumentKind::Corpus, "late.md"))
                    .unwrap();
                if found.is_some() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            cancel.cancel();
            found
        };

        let (started, late) = tokio::join!(
            Arc::new(fx.detector).start(watcher, cancel.clone()),
            driver
        );

        let stats = started.unwrap();
        assert!(stats.created >= 1);
        let late = late.expect("late file should be detected");
        assert_eq!(jobs_for(&fx.db, &late.id), 1);
    }
}
