//! Indexing worker.
//!
//! Polls the work queue, and for each claimed job reads the document,
//! clears its old vectors, chunks and embeds the text, upserts one point per
//! chunk and records the result. Jobs in a batch run concurrently and fail
//! independently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use super::chunker::{Chunker, ChunkerConfig};
use super::source::DocumentSource;
use super::sweep::sweep_deleted;
use crate::config::Config;
use crate::embeddings::Embedder;
use crate::error::IndexingError;
use crate::observability::metrics;
use crate::storage::{
    complete_job, dequeue, enqueue, fail_job, fail_permanently, get_document, mark_failed,
    mark_indexed, now_unix, requeue_stale, Database, DocumentKind, DocumentRecord, FailOutcome,
    QueueJob, PRIORITY_CHANGE,
};
use crate::vector::{point_id, ChunkPayload, VectorIndex, VectorPoint};
use crate::{Error, Result};

/// Note stored on documents that produced no chunks.
pub const EMPTY_DOCUMENT_NOTE: &str = "empty document";

/// Worker tuning, taken from [`Config`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub stale_job_timeout: Duration,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
            stale_job_timeout: config.stale_job_timeout,
        }
    }
}

/// Result of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Document indexed with this many chunks.
    Indexed { chunks: usize },
    /// Content changed while the job ran; a follow-up job was queued.
    Superseded,
    /// Document is tombstoned; its vectors were cleared instead.
    Tombstoned,
    /// Failed and returned to the queue.
    Retrying { retry_count: i64 },
    /// Failed for good.
    Failed,
    /// Queue bookkeeping failed; the job stays `processing` until the stale
    /// timeout returns it.
    Abandoned,
}

impl JobOutcome {
    const fn label(self) -> &'static str {
        match self {
            Self::Indexed { .. } => "indexed",
            Self::Superseded => "superseded",
            Self::Tombstoned => "tombstoned",
            Self::Retrying { .. } => "retrying",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// What the pipeline did before the job is resolved.
#[derive(Debug)]
enum PipelineResult {
    Indexed { chunks: usize },
    Superseded,
    Tombstoned,
}

/// Aggregate of one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub retrying: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub requeued_stale: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Indexed { .. } | JobOutcome::Superseded | JobOutcome::Tombstoned => {
                self.succeeded += 1;
            }
            JobOutcome::Retrying { .. } => self.retrying += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// Indexing worker over one metadata store, embedder and vector index.
pub struct IndexingWorker {
    db: Database,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    chunker: Chunker,
    corpus: DocumentSource,
    uploads: DocumentSource,
    settings: WorkerSettings,
}

impl IndexingWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        db: Database,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            embedder,
            vectors,
            chunker: Chunker::new(ChunkerConfig {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
            }),
            corpus: DocumentSource::for_kind(DocumentKind::Corpus, config),
            uploads: DocumentSource::for_kind(DocumentKind::UserUpload, config),
            settings: WorkerSettings::from(config),
        }
    }

    const fn source(&self, kind: DocumentKind) -> &DocumentSource {
        match kind {
            DocumentKind::Corpus => &self.corpus,
            DocumentKind::UserUpload => &self.uploads,
        }
    }

    /// Requeue stale jobs, claim one batch and process it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the queue itself cannot be read; per-job
    /// failures are recorded on the jobs.
    pub async fn poll_once(&self) -> Result<BatchReport> {
        let requeued_stale = self
            .db
            .with_conn(|conn| requeue_stale(conn, self.settings.stale_job_timeout))?;

        let jobs = dequeue(&self.db, self.settings.batch_size)?;
        let mut report = BatchReport {
            claimed: jobs.len(),
            requeued_stale,
            ..BatchReport::default()
        };

        if jobs.is_empty() {
            tracing::debug!("Queue empty");
            return Ok(report);
        }

        tracing::info!(count = jobs.len(), "Claimed jobs");

        let outcomes = join_all(jobs.iter().map(|job| self.process_job(job))).await;
        for outcome in outcomes {
            report.record(outcome);
        }

        tracing::info!(
            total = report.claimed,
            succeeded = report.succeeded,
            retrying = report.retrying,
            failed = report.failed,
            "Batch processed"
        );

        Ok(report)
    }

    /// Poll until cancelled. Sleeps `poll_interval` whenever the queue is
    /// empty, and sweeps tombstoned vectors at the same time.
    ///
    /// # Errors
    ///
    /// Never fails once started; errors are logged per poll.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            batch_size = self.settings.batch_size,
            poll_interval = ?self.settings.poll_interval,
            "Indexing worker started"
        );

        while !cancel.is_cancelled() {
            let idle = match self.poll_once().await {
                Ok(report) => report.claimed == 0,
                Err(e) => {
                    tracing::error!(error = %e, "Queue poll failed");
                    true
                }
            };

            if !idle {
                continue;
            }

            if let Err(e) = self.sweep_deleted().await {
                tracing::warn!(error = %e, "Tombstone sweep failed");
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        tracing::info!("Indexing worker stopped");
        Ok(())
    }

    /// Remove vectors of tombstoned documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the document listing fails.
    pub async fn sweep_deleted(&self) -> Result<usize> {
        sweep_deleted(&self.db, self.vectors.as_ref()).await
    }

    /// Process one claimed job and resolve it in the queue.
    pub async fn process_job(&self, job: &QueueJob) -> JobOutcome {
        let started = Instant::now();

        tracing::info!(
            job_id = job.id,
            document_id = %job.document_id,
            kind = %job.document_kind,
            retry_count = job.retry_count,
            "Processing job"
        );

        let outcome = match self.run_pipeline(job).await {
            Ok(result) => self.resolve_success(job, result),
            Err(e) => self.resolve_failure(job, &e),
        };

        metrics::record_job(outcome.label(), started.elapsed().as_secs_f64());
        outcome
    }

    async fn run_pipeline(&self, job: &QueueJob) -> Result<PipelineResult> {
        let document = self
            .db
            .with_conn(|conn| get_document(conn, &job.document_id))?
            .ok_or_else(|| IndexingError::DocumentNotFound(job.document_id.clone()))?;

        if document.is_deleted() {
            self.clear_vectors(&document).await?;
            return Ok(PipelineResult::Tombstoned);
        }

        let source = self.source(document.kind);
        let loaded = source.load_content(&document.path).await?;
        let mut metadata = source.derive_metadata(&document.path);

        // Old chunks go first so a retry never sees a mix
        self.clear_vectors(&document).await?;

        let chunks = self.chunker.chunk_content(&loaded.text);
        tracing::debug!(path = %document.path, chunks = chunks.len(), "Document chunked");

        if chunks.is_empty() {
            tracing::warn!(path = %document.path, "No chunks generated");
            metadata = metadata.with_note(EMPTY_DOCUMENT_NOTE);
            let current = self.db.with_conn(|conn| {
                mark_indexed(
                    conn,
                    &document.id,
                    &document.content_hash,
                    &loaded.content_hash,
                    loaded.size,
                    0,
                    &metadata,
                )
            })?;
            return Ok(if current {
                PipelineResult::Indexed { chunks: 0 }
            } else {
                PipelineResult::Superseded
            });
        }

        let embeddings = self.embedder.embed(chunks.clone()).await?;
        if embeddings.len() != chunks.len() {
            return Err(IndexingError::EmbeddingCountMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            }
            .into());
        }

        let indexed_at = now_unix();
        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (text, vector))| VectorPoint {
                id: point_id(&document.id, chunk_index),
                vector,
                payload: ChunkPayload {
                    document_id: document.id.clone(),
                    source: document.kind,
                    file_path: document.path.clone(),
                    chunk_index,
                    text,
                    content_hash: loaded.content_hash.clone(),
                    category: metadata.category.clone(),
                    tags: metadata.tags.clone(),
                    indexed_at,
                },
            })
            .collect();

        let chunk_count = points.len();
        self.vectors.upsert(points).await?;
        metrics::record_chunks(chunk_count);

        // The record may lag the file (offline edit, missed event); what was
        // read wins unless the detector recorded something newer meanwhile.
        let current = self.db.with_conn(|conn| {
            mark_indexed(
                conn,
                &document.id,
                &document.content_hash,
                &loaded.content_hash,
                loaded.size,
                chunk_count,
                &metadata,
            )
        })?;

        if !current {
            return Ok(PipelineResult::Superseded);
        }

        tracing::info!(
            path = %document.path,
            document_id = %document.id,
            chunks = chunk_count,
            "Indexed document"
        );

        Ok(PipelineResult::Indexed {
            chunks: chunk_count,
        })
    }

    async fn clear_vectors(&self, document: &DocumentRecord) -> Result<()> {
        let removed = self
            .vectors
            .delete_by_document(document.kind, &document.path)
            .await?;

        if removed > 0 {
            metrics::record_vectors_deleted(removed);
            tracing::debug!(path = %document.path, count = removed, "Deleted old vectors");
        }

        Ok(())
    }

    fn resolve_success(&self, job: &QueueJob, result: PipelineResult) -> JobOutcome {
        let outcome = match result {
            PipelineResult::Indexed { chunks } => JobOutcome::Indexed { chunks },
            PipelineResult::Tombstoned => {
                tracing::info!(document_id = %job.document_id, "Document tombstoned, vectors cleared");
                JobOutcome::Tombstoned
            }
            PipelineResult::Superseded => {
                // Points from this run may have landed after a newer run's, so
                // the document is queued again to converge on the latest content.
                tracing::info!(
                    document_id = %job.document_id,
                    "Document changed during indexing, queueing follow-up"
                );
                let queued = self.db.with_conn(|conn| {
                    enqueue(
                        conn,
                        job.document_kind,
                        &job.document_id,
                        PRIORITY_CHANGE,
                        self.settings.max_retries,
                    )
                });
                if let Err(e) = queued {
                    tracing::error!(document_id = %job.document_id, error = %e, "Failed to queue follow-up");
                }
                JobOutcome::Superseded
            }
        };

        match self.db.with_conn(|conn| complete_job(conn, job.id)) {
            Ok(()) => {
                tracing::debug!(job_id = job.id, "Job completed");
                outcome
            }
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Failed to complete job");
                JobOutcome::Abandoned
            }
        }
    }

    fn resolve_failure(&self, job: &QueueJob, error: &Error) -> JobOutcome {
        match self.record_failure(job, error) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = job.id, error = %e, "Failed to record job failure");
                JobOutcome::Abandoned
            }
        }
    }

    fn record_failure(&self, job: &QueueJob, error: &Error) -> Result<JobOutcome> {
        let message = error.to_string();

        if error.is_permanent() {
            self.db
                .with_conn(|conn| fail_permanently(conn, job.id, &message))?;
            tracing::error!(job_id = job.id, error = %message, "Job failed permanently");
            return Ok(JobOutcome::Failed);
        }

        let outcome = self.db.with_conn(|conn| {
            fail_job(conn, job.id, &message, self.settings.retry_backoff)
        })?;

        match outcome {
            FailOutcome::Retrying { retry_count } => {
                tracing::warn!(
                    job_id = job.id,
                    document_id = %job.document_id,
                    retry = retry_count,
                    error = %message,
                    "Job failed, retry scheduled"
                );
                Ok(JobOutcome::Retrying { retry_count })
            }
            FailOutcome::Exhausted => {
                let marked = self
                    .db
                    .with_conn(|conn| mark_failed(conn, &job.document_id, &message))?;
                tracing::error!(
                    job_id = job.id,
                    document_id = %job.document_id,
                    document_marked = marked,
                    error = %message,
                    "Job failed, retries exhausted"
                );
                Ok(JobOutcome::Failed)
            }
        }
    }
}

impl std::fmt::Debug for IndexingWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingWorker")
            .field("model", &self.embedder.model_name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
