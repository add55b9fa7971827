//! Prometheus metrics definitions.
//!
//! Metrics live in a crate-private registry created on first use. If
//! registration ever fails the recorders become no-ops and a warning is
//! logged once.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use crate::storage::{DocumentStatus, StatusReport};

struct Metrics {
    registry: Registry,
    jobs_processed: IntCounterVec,
    job_duration: HistogramVec,
    chunks_indexed: IntCounter,
    vectors_deleted: IntCounter,
    change_events: IntCounterVec,
    queue_depth: IntGauge,
    documents: IntGaugeVec,
}

impl Metrics {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let jobs_processed = IntCounterVec::new(
            Opts::new("docindex_jobs_processed_total", "Indexing jobs processed by outcome"),
            &["outcome"],
        )?;
        let job_duration = HistogramVec::new(
            HistogramOpts::new("docindex_job_duration_seconds", "Indexing job duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["outcome"],
        )?;
        let chunks_indexed =
            IntCounter::new("docindex_chunks_indexed_total", "Chunks embedded and stored")?;
        let vectors_deleted = IntCounter::new(
            "docindex_vectors_deleted_total",
            "Vectors removed during cleanup",
        )?;
        let change_events = IntCounterVec::new(
            Opts::new("docindex_change_events_total", "Change detector outcomes"),
            &["kind"],
        )?;
        let queue_depth = IntGauge::new(
            "docindex_queue_depth",
            "Jobs pending or processing",
        )?;
        let documents = IntGaugeVec::new(
            Opts::new("docindex_documents", "Documents by indexing status"),
            &["status"],
        )?;

        registry.register(Box::new(jobs_processed.clone()))?;
        registry.register(Box::new(job_duration.clone()))?;
        registry.register(Box::new(chunks_indexed.clone()))?;
        registry.register(Box::new(vectors_deleted.clone()))?;
        registry.register(Box::new(change_events.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(documents.clone()))?;

        Ok(Self {
            registry,
            jobs_processed,
            job_duration,
            chunks_indexed,
            vectors_deleted,
            change_events,
            queue_depth,
            documents,
        })
    }
}

static METRICS: Lazy<Option<Metrics>> = Lazy::new(|| match Metrics::new() {
    Ok(metrics) => Some(metrics),
    Err(e) => {
        tracing::warn!(error = %e, "Metrics disabled: registration failed");
        None
    }
});

/// Initialize all metrics (call once at startup).
pub fn init_metrics() {
    if METRICS.is_some() {
        tracing::debug!("Prometheus metrics initialized");
    }
}

/// Record one finished job.
pub fn record_job(outcome: &str, seconds: f64) {
    if let Some(m) = METRICS.as_ref() {
        m.jobs_processed.with_label_values(&[outcome]).inc();
        m.job_duration.with_label_values(&[outcome]).observe(seconds);
    }
}

/// Record chunks written for one document.
pub fn record_chunks(count: usize) {
    if let Some(m) = METRICS.as_ref() {
        m.chunks_indexed.inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }
}

/// Record vectors removed.
pub fn record_vectors_deleted(count: usize) {
    if let Some(m) = METRICS.as_ref() {
        m.vectors_deleted
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }
}

/// Record a change detector outcome (`created`, `modified`, ...).
pub fn record_change(kind: &str) {
    if let Some(m) = METRICS.as_ref() {
        m.change_events.with_label_values(&[kind]).inc();
    }
}

/// Refresh gauges from a status report.
pub fn observe_status(report: &StatusReport) {
    if let Some(m) = METRICS.as_ref() {
        m.queue_depth.set(report.queue_depth);
        for status in DocumentStatus::ALL {
            m.documents
                .with_label_values(&[status.as_str()])
                .set(report.count(status));
        }
    }
}

/// Render all metrics in the Prometheus text format.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn render() -> crate::Result<String> {
    let Some(m) = METRICS.as_ref() else {
        return Ok(String::new());
    };

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&m.registry.gather(), &mut buffer)
        .map_err(|e| crate::Error::internal(format!("failed to encode metrics: {e}")))?;

    String::from_utf8(buffer)
        .map_err(|e| crate::Error::internal(format!("metrics are not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_metrics_render() {
        init_metrics();

        record_job("completed", 0.2);
        record_chunks(3);
        record_change("created");

        let text = render().unwrap();
        assert!(text.contains("docindex_jobs_processed_total"));
        assert!(text.contains("docindex_chunks_indexed_total"));
        assert!(text.contains("docindex_change_events_total"));
    }

    #[test]
    fn test_observe_status_sets_gauges() {
        let mut by_status = BTreeMap::new();
        by_status.insert("pending".to_string(), 4);
        by_status.insert("indexed".to_string(), 7);

        observe_status(&StatusReport {
            total_documents: 11,
            by_status,
            queue_depth: 4,
            last_update: None,
        });

        let text = render().unwrap();
        assert!(text.contains(r#"docindex_documents{status="indexed"} 7"#));
    }
}
