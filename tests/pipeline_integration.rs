//! End-to-end tests: change detector, work queue and indexing worker over
//! a temporary corpus.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docindex::embeddings::HashEmbedder;
use docindex::storage::{
    get_document_by_path, init_storage, list_jobs_for_document, queue_depth, status_report,
    Database, DocumentKind, DocumentRecord, DocumentStatus, JobStatus,
};
use docindex::vector::{SqliteVectorIndex, VectorIndex};
use docindex::watcher::{fingerprint_bytes, ChangeDetector, ChangeOutcome, PathFilter};
use docindex::worker::{reindex_document, IndexingWorker};
use docindex::Config;
use tempfile::TempDir;

const DIM: usize = 16;

struct Pipeline {
    _tmp: TempDir,
    root: PathBuf,
    db: Database,
    vectors: Arc<SqliteVectorIndex>,
    detector: ChangeDetector,
    worker: IndexingWorker,
}

impl Pipeline {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();

        let config = Config {
            corpus_root: root.clone(),
            chunk_size: 64,
            chunk_overlap: 8,
            embedding_dimension: DIM,
            max_retries: 3,
            ..Config::default()
        };
        config.validate().unwrap();

        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();

        let vectors = Arc::new(SqliteVectorIndex::open_in_memory("documents").unwrap());
        vectors.ensure_collection(DIM).await.unwrap();

        let detector = ChangeDetector::new(
            db.clone(),
            PathFilter::from_config(&config).unwrap(),
            config.max_retries,
        );
        let worker = IndexingWorker::new(
            db.clone(),
            Arc::new(HashEmbedder::new(DIM)),
            vectors.clone(),
            &config,
        );

        Self {
            _tmp: tmp,
            root,
            db,
            vectors,
            detector,
            worker,
        }
    }

    fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn document(&self, relative: &str) -> DocumentRecord {
        self.db
            .with_conn(|conn| get_document_by_path(conn, DocumentKind::Corpus, relative))
            .unwrap()
            .unwrap()
    }

    fn job_count(&self, relative: &str) -> usize {
        let id = self.document(relative).id;
        self.db
            .with_conn(|conn| list_jobs_for_document(conn, &id))
            .unwrap()
            .len()
    }

    async fn vector_count(&self, relative: &str) -> usize {
        self.vectors
            .count_by_document(DocumentKind::Corpus, relative)
            .await
            .unwrap()
    }

    async fn drain(&self) {
        while self.worker.poll_once().await.unwrap().claimed > 0 {}
    }
}

fn paragraphs(word: &str, count: usize) -> String {
    (0..count)
        .map(|i| format!("{word} paragraph number {i} has a few words in it."))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn change(pipeline: &Pipeline, path: &Path) -> ChangeOutcome {
    pipeline.detector.handle_change(path, 10).unwrap()
}

#[tokio::test]
async fn test_modified_document_replaces_its_vectors() {
    let p = Pipeline::new().await;
    let v1 = paragraphs("alpha", 6);
    let path = p.write("a/b.md", &v1);

    assert!(matches!(change(&p, &path), ChangeOutcome::Created { .. }));
    p.drain().await;

    let doc = p.document("a/b.md");
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(doc.content_hash, fingerprint_bytes(v1.as_bytes()));
    let n = p.vector_count("a/b.md").await;
    assert!(n > 0);
    assert_eq!(i64::try_from(n).unwrap(), doc.chunk_count);

    let v2 = paragraphs("beta", 2);
    p.write("a/b.md", &v2);
    assert!(matches!(change(&p, &path), ChangeOutcome::Modified { .. }));
    assert_eq!(p.document("a/b.md").status, DocumentStatus::Pending);
    p.drain().await;

    let doc = p.document("a/b.md");
    let m = p.vector_count("a/b.md").await;
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(doc.content_hash, fingerprint_bytes(v2.as_bytes()));
    assert_eq!(i64::try_from(m).unwrap(), doc.chunk_count);
    assert!(m < n);

    let points = p
        .vectors
        .scroll_by_document(DocumentKind::Corpus, "a/b.md")
        .await
        .unwrap();
    assert!(points.iter().all(|pt| pt.payload.text.contains("beta")));
    assert!(points
        .iter()
        .all(|pt| pt.payload.content_hash == doc.content_hash));
}

#[tokio::test]
async fn test_unchanged_reconcile_creates_no_jobs() {
    let p = Pipeline::new().await;
    p.write("one.md", &paragraphs("one", 2));
    p.write("two/three.txt", &paragraphs("three", 2));

    let first = p.detector.reconcile().unwrap();
    assert_eq!(first.created, 2);
    p.drain().await;

    let second = p.detector.reconcile().unwrap();
    assert_eq!(second.enqueued(), 0);
    assert_eq!(p.job_count("one.md"), 1);
    assert_eq!(p.job_count("two/three.txt"), 1);
    assert_eq!(p.db.with_conn(queue_depth).unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_notifications_queue_once() {
    let p = Pipeline::new().await;
    let path = p.write("dup.md", "same content");

    for _ in 0..5 {
        change(&p, &path);
    }
    assert_eq!(p.job_count("dup.md"), 1);
}

#[tokio::test]
async fn test_file_deleted_before_read_exhausts_retries() {
    let p = Pipeline::new().await;
    let path = p.write("gone.md", "short lived");
    change(&p, &path);
    fs::remove_file(&path).unwrap();

    let first = p.worker.poll_once().await.unwrap();
    assert_eq!(first.retrying, 1);

    let doc_id = p.document("gone.md").id;
    let job = &p
        .db
        .with_conn(|conn| list_jobs_for_document(conn, &doc_id))
        .unwrap()[0];
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);

    p.drain().await;

    let job = &p
        .db
        .with_conn(|conn| list_jobs_for_document(conn, &doc_id))
        .unwrap()[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, job.max_retries);

    let doc = p.document("gone.md");
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error_message.is_some());
    assert_eq!(p.vector_count("gone.md").await, 0);
}

#[tokio::test]
async fn test_empty_document_is_indexed_without_vectors() {
    let p = Pipeline::new().await;
    let path = p.write("empty.md", "");
    change(&p, &path);
    p.drain().await;

    let doc = p.document("empty.md");
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(doc.chunk_count, 0);
    assert!(doc.error_message.is_none());
    assert_eq!(p.vector_count("empty.md").await, 0);
}

#[tokio::test]
async fn test_manual_reindex_is_idempotent() {
    let p = Pipeline::new().await;
    let path = p.write("stable.md", &paragraphs("stable", 4));
    change(&p, &path);
    p.drain().await;

    let before = p
        .vectors
        .scroll_by_document(DocumentKind::Corpus, "stable.md")
        .await
        .unwrap();

    for _ in 0..2 {
        reindex_document(&p.db, DocumentKind::Corpus, "stable.md", 10, 3).unwrap();
        p.drain().await;

        let doc = p.document("stable.md");
        assert_eq!(doc.status, DocumentStatus::Indexed);
        assert_eq!(
            i64::try_from(p.vector_count("stable.md").await).unwrap(),
            doc.chunk_count
        );
    }

    let after = p
        .vectors
        .scroll_by_document(DocumentKind::Corpus, "stable.md")
        .await
        .unwrap();
    let ids = |points: &[docindex::vector::VectorPoint]| {
        points.iter().map(|pt| pt.id).collect::<Vec<_>>()
    };
    assert_eq!(ids(&before), ids(&after));
}

#[tokio::test]
async fn test_offline_edit_converges_without_detector() {
    let p = Pipeline::new().await;
    let v1 = paragraphs("old", 3);
    let path = p.write("offline.md", &v1);
    change(&p, &path);
    p.drain().await;

    // Edited while nothing was running; only a manual re-index follows
    let v2 = paragraphs("new", 2);
    p.write("offline.md", &v2);
    reindex_document(&p.db, DocumentKind::Corpus, "offline.md", 10, 3).unwrap();

    let mut claimed = 0;
    for _ in 0..20 {
        claimed += p.worker.poll_once().await.unwrap().claimed;
    }
    assert_eq!(claimed, 1);
    assert_eq!(p.job_count("offline.md"), 2);

    let doc = p.document("offline.md");
    assert_eq!(doc.status, DocumentStatus::Indexed);
    assert_eq!(doc.content_hash, fingerprint_bytes(v2.as_bytes()));
    assert_eq!(
        i64::try_from(p.vector_count("offline.md").await).unwrap(),
        doc.chunk_count
    );

    // The detector now sees nothing new
    assert_eq!(change(&p, &path), ChangeOutcome::Unchanged);
}

#[tokio::test]
async fn test_deletion_tombstones_and_sweep_clears_vectors() {
    let p = Pipeline::new().await;
    let path = p.write("doomed.md", &paragraphs("doomed", 3));
    change(&p, &path);
    p.drain().await;
    assert!(p.vector_count("doomed.md").await > 0);

    fs::remove_file(&path).unwrap();
    assert!(matches!(
        p.detector.handle_delete(&path).unwrap(),
        ChangeOutcome::Deleted { .. }
    ));
    assert_eq!(p.document("doomed.md").status, DocumentStatus::Deleted);

    // Deletion queues nothing; vectors stay until swept
    assert_eq!(p.job_count("doomed.md"), 1);
    assert!(p.vector_count("doomed.md").await > 0);

    let removed = p.worker.sweep_deleted().await.unwrap();
    assert!(removed > 0);
    assert_eq!(p.vector_count("doomed.md").await, 0);

    let report = p.db.with_conn(status_report).unwrap();
    assert_eq!(report.count(DocumentStatus::Deleted), 1);
}

#[tokio::test]
async fn test_status_report_tracks_pipeline() {
    let p = Pipeline::new().await;
    p.write("x.md", "x content");
    p.write("y.md", "y content");
    p.detector.reconcile().unwrap();

    let report = p.db.with_conn(status_report).unwrap();
    assert_eq!(report.total_documents, 2);
    assert_eq!(report.count(DocumentStatus::Pending), 2);
    assert_eq!(report.queue_depth, 2);

    p.drain().await;

    let report = p.db.with_conn(status_report).unwrap();
    assert_eq!(report.count(DocumentStatus::Indexed), 2);
    assert_eq!(report.queue_depth, 0);
    assert!(report.last_update.is_some());
}
