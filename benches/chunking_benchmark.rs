//! Throughput benchmarks for the hot paths of a re-index: chunking,
//! fingerprinting and queue claims.
//!
//! **Run benchmarks:**
//! ```bash
//! cargo bench                      # Run all benchmarks
//! cargo bench -- chunking          # Chunker only
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docindex::storage::{dequeue, enqueue, init_storage, Database, DocumentKind};
use docindex::watcher::fingerprint_bytes;
use docindex::worker::{Chunker, ChunkerConfig};

/// Markdown-ish document of roughly `size` bytes.
fn sample_document(size: usize) -> String {
    let paragraph = "Indexing keeps the vector store in step with the corpus. \
                     Each changed file is chunked, embedded and written back.\n\
                     A second line follows the first one.\n\n";
    paragraph.repeat(size / paragraph.len() + 1)
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunking");
    group.sample_size(10);
    group.measurement_time(std::time::Duration::from_secs(5));

    let chunker = Chunker::new(ChunkerConfig::default());

    for size in &[4_096usize, 65_536, 1_048_576] {
        let document = sample_document(*size);
        group.throughput(Throughput::Bytes(document.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &document, |b, doc| {
            b.iter(|| black_box(chunker.chunk_content(black_box(doc))));
        });
    }

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    group.sample_size(10);

    for size in &[4_096usize, 1_048_576] {
        let document = sample_document(*size);
        group.throughput(Throughput::Bytes(document.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &document, |b, doc| {
            b.iter(|| black_box(fingerprint_bytes(black_box(doc.as_bytes()))));
        });
    }

    group.finish();
}

fn bench_queue_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_claim");
    group.sample_size(10);

    group.bench_function("enqueue_and_claim_batch_of_10", |b| {
        let db = Database::open_in_memory().expect("open database");
        init_storage(&db).expect("init storage");

        b.iter(|| {
            db.with_conn(|conn| {
                for i in 0..10 {
                    enqueue(conn, DocumentKind::Corpus, &format!("doc-{i}"), 5, 3)?;
                }
                Ok(())
            })
            .expect("enqueue");
            black_box(dequeue(&db, 10).expect("dequeue"))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_chunking, bench_fingerprint, bench_queue_claim);
criterion_main!(benches);
