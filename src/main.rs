//! docindex - content-addressed document indexing
//!
//! Entry point for the docindex CLI.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use docindex::config::EmbeddingBackend;
use docindex::embeddings::{create_embedder, Embedder};
use docindex::observability::{init_tracing, metrics, serve_metrics};
use docindex::storage::{
    init_storage, status_report, Database, DocumentKind, PRIORITY_BACKGROUND, PRIORITY_CHANGE,
};
use docindex::vector::{SqliteVectorIndex, VectorIndex};
use docindex::watcher::{ChangeDetector, FileWatcher, PathFilter};
use docindex::worker::{reindex_all, reindex_document, sweep_deleted, IndexingWorker};
use docindex::Config;

/// docindex - keep a vector index in step with a document corpus
#[derive(Parser, Debug)]
#[command(name = "docindex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory for the metadata and vector databases
    #[arg(short, long, global = true, env = "DOCINDEX_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Root of the document corpus
    #[arg(short, long, global = true, env = "DOCINDEX_CORPUS_ROOT", default_value = "./corpus")]
    corpus_root: PathBuf,

    /// Root of user-uploaded documents
    #[arg(long, global = true, env = "DOCINDEX_UPLOAD_ROOT")]
    upload_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "DOCINDEX_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, global = true, env = "DOCINDEX_LOG_JSON")]
    log_json: bool,

    /// File extensions to index
    #[arg(
        long,
        global = true,
        env = "DOCINDEX_INCLUDE_EXTENSIONS",
        value_delimiter = ',',
        default_value = ".md,.txt"
    )]
    include_extensions: Vec<String>,

    /// Path substrings that exclude a file
    #[arg(
        long,
        global = true,
        env = "DOCINDEX_EXCLUDE_PATTERNS",
        value_delimiter = ',',
        default_value = ".git,__pycache__,.DS_Store,node_modules,.pytest_cache"
    )]
    exclude_patterns: Vec<String>,

    /// Gitignore-style globs that exclude a file
    #[arg(long, global = true, env = "DOCINDEX_IGNORE_GLOBS", value_delimiter = ',')]
    ignore_globs: Vec<String>,

    /// Debounce window for filesystem events, in milliseconds
    #[arg(long, global = true, env = "DOCINDEX_WATCH_DEBOUNCE_MS", default_value = "500")]
    watch_debounce_ms: u64,

    /// Jobs claimed and processed concurrently per poll
    #[arg(long, global = true, env = "DOCINDEX_BATCH_SIZE", default_value = "10")]
    batch_size: usize,

    /// Seconds to wait between polls of an empty queue
    #[arg(long, global = true, env = "DOCINDEX_POLL_INTERVAL", default_value = "5")]
    poll_interval: u64,

    /// Attempts per job before it is marked failed
    #[arg(long, global = true, env = "DOCINDEX_MAX_RETRIES", default_value = "3")]
    max_retries: u32,

    /// Base retry delay in seconds, doubled per attempt (0 = requeue immediately)
    #[arg(long, global = true, env = "DOCINDEX_RETRY_BACKOFF", default_value = "0")]
    retry_backoff: u64,

    /// Seconds after which a processing job is considered orphaned
    #[arg(long, global = true, env = "DOCINDEX_STALE_JOB_TIMEOUT", default_value = "600")]
    stale_job_timeout: u64,

    /// Target chunk size in characters
    #[arg(long, global = true, env = "DOCINDEX_CHUNK_SIZE", default_value = "512")]
    chunk_size: usize,

    /// Overlap between chunks in characters
    #[arg(long, global = true, env = "DOCINDEX_CHUNK_OVERLAP", default_value = "50")]
    chunk_overlap: usize,

    /// Embedding backend (http, hash)
    #[arg(long, global = true, env = "DOCINDEX_EMBEDDING_BACKEND", default_value = "http")]
    embedding_backend: EmbeddingBackend,

    /// Base URL of an OpenAI-compatible embedding service
    #[arg(
        long,
        global = true,
        env = "DOCINDEX_EMBEDDING_URL",
        default_value = "https://api.openai.com/v1"
    )]
    embedding_url: String,

    /// Embedding model name
    #[arg(
        long,
        global = true,
        env = "DOCINDEX_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embedding_model: String,

    /// API key for the embedding service
    #[arg(long, global = true, env = "DOCINDEX_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Embedding vector dimension
    #[arg(long, global = true, env = "DOCINDEX_EMBEDDING_DIMENSION", default_value = "1536")]
    embedding_dimension: usize,

    /// Embedding request timeout in seconds
    #[arg(long, global = true, env = "DOCINDEX_EMBEDDING_TIMEOUT", default_value = "30")]
    embedding_timeout: u64,

    /// Vector collection name
    #[arg(long, global = true, env = "DOCINDEX_COLLECTION", default_value = "documents")]
    collection: String,

    /// Serve Prometheus metrics on this address while running (e.g. 127.0.0.1:9464)
    #[arg(long, global = true, env = "DOCINDEX_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile, then watch the corpus and index until interrupted
    Run,

    /// Reconcile the corpus against the metadata store once
    Scan,

    /// Run only the indexing worker
    Work {
        /// Process a single batch and exit
        #[arg(long)]
        once: bool,
    },

    /// Queue documents for re-indexing
    Reindex {
        /// Source-relative path of one document; all documents when omitted
        #[arg(long)]
        path: Option<String>,

        /// Document kind (corpus, user_upload)
        #[arg(long, default_value = "corpus")]
        kind: DocumentKind,

        /// Job priority (defaults: 10 for one document, 5 for all)
        #[arg(long)]
        priority: Option<i64>,
    },

    /// Remove vectors of deleted documents
    Sweep,

    /// Show indexing status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Also print the status gauges in Prometheus format
        #[arg(long)]
        metrics: bool,
    },
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            data_dir: self.data_dir.clone(),
            corpus_root: self.corpus_root.clone(),
            upload_root: self.upload_root.clone(),
            log_level: self.log_level.clone(),
            include_extensions: self.include_extensions.clone(),
            exclude_patterns: self.exclude_patterns.clone(),
            ignore_globs: self.ignore_globs.clone(),
            watch_debounce: Duration::from_millis(self.watch_debounce_ms),
            batch_size: self.batch_size,
            poll_interval: Duration::from_secs(self.poll_interval),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_secs(self.retry_backoff),
            stale_job_timeout: Duration::from_secs(self.stale_job_timeout),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            embedding_backend: self.embedding_backend,
            embedding_url: self.embedding_url.clone(),
            embedding_model: self.embedding_model.clone(),
            embedding_api_key: self.embedding_api_key.clone(),
            embedding_dimension: self.embedding_dimension,
            embedding_timeout: Duration::from_secs(self.embedding_timeout),
            collection: self.collection.clone(),
            metrics_addr: self.metrics_addr,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json)?;

    tracing::info!("docindex v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = cli.config();
    tracing::debug!(?config, "Configuration loaded");
    config.validate()?;

    metrics::init_metrics();

    match cli.command {
        Command::Run => run(with_roots(config)?).await,
        Command::Scan => scan(&with_roots(config)?),
        Command::Work { once } => work(with_roots(config)?, once).await,
        Command::Reindex {
            path,
            kind,
            priority,
        } => reindex(&config, path.as_deref(), kind, priority),
        Command::Sweep => sweep(&config).await,
        Command::Status {
            json,
            metrics: with_metrics,
        } => status(&config, json, with_metrics),
    }
}

/// Check the source roots and canonicalize the corpus root so watcher
/// paths and worker paths agree.
fn with_roots(mut config: Config) -> anyhow::Result<Config> {
    config.check_roots()?;
    config.corpus_root = config
        .corpus_root
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", config.corpus_root.display()))?;
    Ok(config)
}

fn open_metadata(config: &Config) -> anyhow::Result<Database> {
    let db = Database::open(config.database_path())
        .with_context(|| format!("failed to open {}", config.database_path().display()))?;
    init_storage(&db)?;
    Ok(db)
}

async fn open_vectors(config: &Config) -> anyhow::Result<Arc<SqliteVectorIndex>> {
    let vectors = SqliteVectorIndex::open(config.vector_database_path(), &config.collection)?;
    vectors.health_check().await?;
    vectors.ensure_collection(config.embedding_dimension).await?;
    Ok(Arc::new(vectors))
}

async fn connect_embedder(config: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder = create_embedder(config)?;
    embedder
        .health_check()
        .await
        .context("embedding service is not usable")?;

    tracing::info!(
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedding service ready"
    );
    Ok(embedder)
}

fn detector(config: &Config, db: Database) -> anyhow::Result<ChangeDetector> {
    let filter = PathFilter::from_config(config)?;
    Ok(ChangeDetector::new(db, filter, config.max_retries))
}

/// Serve `/metrics` until `cancel` fires, when an address is configured.
/// A failed endpoint cancels the rest of the process.
async fn metrics_endpoint(
    config: &Config,
    db: Database,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let Some(addr) = config.metrics_addr else {
        return Ok(());
    };

    let served = serve_metrics(addr, db, cancel.clone()).await;
    if served.is_err() {
        cancel.cancel();
    }
    Ok(served?)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

async fn run(config: Config) -> anyhow::Result<()> {
    let db = open_metadata(&config)?;
    let embedder = connect_embedder(&config).await?;
    let vectors = open_vectors(&config).await?;

    let detector = Arc::new(detector(&config, db.clone())?);

    // Watch first so edits made during the walk are still delivered
    let watcher = FileWatcher::new(&config.corpus_root, config.watch_debounce)?;
    let worker = IndexingWorker::new(db.clone(), embedder, vectors, &config);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let detector_cancel = cancel.clone();
    let detecting = async move {
        let result = detector.start(watcher, detector_cancel.clone()).await;
        // Without change events the worker would only drain what is queued
        detector_cancel.cancel();
        result
    };

    let (detected, worked, served) = tokio::join!(
        detecting,
        worker.run(cancel.clone()),
        metrics_endpoint(&config, db, cancel.clone())
    );
    detected?;
    worked?;
    served?;

    tracing::info!("docindex stopped");
    Ok(())
}

fn scan(config: &Config) -> anyhow::Result<()> {
    let db = open_metadata(config)?;
    let stats = detector(config, db)?.reconcile()?;

    println!(
        "created {}, modified {}, unchanged {}, deleted {}, errors {}",
        stats.created, stats.modified, stats.unchanged, stats.deleted, stats.errors
    );
    Ok(())
}

async fn work(config: Config, once: bool) -> anyhow::Result<()> {
    let db = open_metadata(&config)?;
    let embedder = connect_embedder(&config).await?;
    let vectors = open_vectors(&config).await?;
    let worker = IndexingWorker::new(db.clone(), embedder, vectors, &config);

    if once {
        let report = worker.poll_once().await?;
        println!(
            "claimed {}, succeeded {}, retrying {}, failed {}",
            report.claimed, report.succeeded, report.retrying, report.failed
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let (worked, served) = tokio::join!(
        worker.run(cancel.clone()),
        metrics_endpoint(&config, db, cancel.clone())
    );
    worked?;
    served?;
    Ok(())
}

fn reindex(
    config: &Config,
    path: Option<&str>,
    kind: DocumentKind,
    priority: Option<i64>,
) -> anyhow::Result<()> {
    let db = open_metadata(config)?;

    if let Some(path) = path {
        let job_id = reindex_document(
            &db,
            kind,
            path,
            priority.unwrap_or(PRIORITY_CHANGE),
            config.max_retries,
        )?;
        println!("queued job {job_id} for {path}");
    } else {
        let count = reindex_all(
            &db,
            priority.unwrap_or(PRIORITY_BACKGROUND),
            config.max_retries,
        )?;
        println!("queued {count} documents");
    }

    Ok(())
}

async fn sweep(config: &Config) -> anyhow::Result<()> {
    let db = open_metadata(config)?;
    let vectors = open_vectors(config).await?;
    let removed = sweep_deleted(&db, vectors.as_ref()).await?;
    println!("removed {removed} vectors");
    Ok(())
}

fn status(config: &Config, json: bool, with_metrics: bool) -> anyhow::Result<()> {
    let db = open_metadata(config)?;
    let report = db.with_conn(status_report)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("documents:   {}", report.total_documents);
        for (status, count) in &report.by_status {
            println!("  {status:<10} {count}");
        }
        println!("queue depth: {}", report.queue_depth);
        println!(
            "last update: {}",
            report
                .last_update_rfc3339()
                .unwrap_or_else(|| "never".to_string())
        );
    }

    if with_metrics {
        metrics::observe_status(&report);
        print!("{}", metrics::render()?);
    }

    Ok(())
}
