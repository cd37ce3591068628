//! Benchmarks for embedding and dedup decisions.
//!
//! The index is a linear scan, so `dedup_and_index` cost grows with the
//! number of stored documents. These benchmarks track that slope.
//!
//! # Dataset Size
//!
//! 1,000 documents by default for CI speed. Set `BENCH_FULL_SCALE=1` to
//! populate 100,000:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p docpipe-vector
//! ```

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use docpipe_core::metrics::NoopMetrics;
use docpipe_core::types::{EmbeddedDoc, Token};
use docpipe_vector::{Embedder, EmbeddingIndex};

const CI_DOC_COUNT: usize = 1_000;
const FULL_SCALE_DOC_COUNT: usize = 100_000;
const DIMENSIONS: usize = 1024;

fn doc_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_DOC_COUNT
    } else {
        CI_DOC_COUNT
    }
}

/// Realistic token stream (~100 terms), made unique by a trailing index.
fn generate_tokens(index: usize) -> Vec<Token> {
    let text = format!(
        "the quick brown fox jumps over the lazy dog near the river bank \
         meanwhile the engineer reviewed the pull request containing several \
         important changes to the authentication module the deployment \
         pipeline ran successfully across all three environments including \
         staging production and disaster recovery chunk{} marker{}",
        index,
        index * 7
    );
    text.split_whitespace().map(Token::new).collect()
}

fn build_populated_index(count: usize, embedder: &Embedder) -> EmbeddingIndex {
    // High threshold so the near-identical benchmark docs are all stored.
    let index = EmbeddingIndex::with_capacity(0.999, count, Arc::new(NoopMetrics))
        .expect("valid threshold");
    for i in 0..count {
        index.dedup_and_index(EmbeddedDoc {
            id: format!("doc-{}", i),
            embedding: embedder.embed(&generate_tokens(i)),
        });
    }
    index
}

fn bench_embed(c: &mut Criterion) {
    let embedder = Embedder::new(DIMENSIONS).expect("valid dimensions");
    let tokens = generate_tokens(42);

    c.bench_function("embed_100_tokens_1024d", |b| {
        b.iter(|| embedder.embed(&tokens));
    });
}

fn bench_dedup(c: &mut Criterion) {
    let embedder = Embedder::new(DIMENSIONS).expect("valid dimensions");
    let count = doc_count();

    let mut group = c.benchmark_group("dedup_and_index");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    for size in [count / 10, count] {
        let index = build_populated_index(size, &embedder);
        // An exact copy of a stored document: flagged, so the index
        // does not grow across iterations.
        let query = embedder.embed(&generate_tokens(0));

        group.bench_with_input(BenchmarkId::new("duplicate_query", size), &size, |b, _| {
            b.iter(|| {
                let result = index.dedup_and_index(EmbeddedDoc {
                    id: "query".to_string(),
                    embedding: query.clone(),
                });
                assert!(result.is_duplicate);
                result
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_embed, bench_dedup);
criterion_main!(benches);
