//! In-memory embedding index with approximate deduplication.
//!
//! Embeddings are stored in two parallel arrays behind an `RwLock`. A dedup
//! decision copies the arrays under the read lock (the entries are `Arc`s,
//! so the copy is O(n) pointer clones), scans the copy with no lock held,
//! and only takes the write lock to append a non-duplicate.
//!
//! The scan and the append are not one critical section. Two callers
//! submitting the same content at the same time can both miss each other
//! and both insert, so a near-duplicate cluster is stored
//! approximately-at-most-once, not exactly once.
//!
//! Lookups are a linear scan. Sharding or an approximate nearest-neighbor
//! structure (HNSW) can replace it without changing the public API.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use docpipe_core::error::{DocPipeError, Result};
use docpipe_core::metrics::IndexMetrics;
use docpipe_core::types::{DedupResult, EmbeddedDoc};

/// Default preallocated capacity of the index arrays.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A single hit returned from `EmbeddingIndex::search`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: Arc<str>,
    /// Dot-product similarity (cosine for unit vectors).
    pub score: f32,
}

#[derive(Debug)]
struct Nearest {
    id: String,
    score: f32,
}

#[derive(Debug, Default)]
struct Entries {
    ids: Vec<Arc<str>>,
    vecs: Vec<Arc<[f32]>>,
}

/// Thread-safe store of previously seen embeddings.
pub struct EmbeddingIndex {
    entries: RwLock<Entries>,
    dedup_threshold: f32,
    metrics: Arc<dyn IndexMetrics>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("len", &self.len())
            .field("dedup_threshold", &self.dedup_threshold)
            .finish()
    }
}

impl EmbeddingIndex {
    /// Create an empty index with the given dedup threshold.
    ///
    /// The threshold must lie in (0.0, 1.0].
    pub fn new(dedup_threshold: f32, metrics: Arc<dyn IndexMetrics>) -> Result<Self> {
        Self::with_capacity(dedup_threshold, DEFAULT_CAPACITY, metrics)
    }

    pub fn with_capacity(
        dedup_threshold: f32,
        capacity: usize,
        metrics: Arc<dyn IndexMetrics>,
    ) -> Result<Self> {
        if !(dedup_threshold > 0.0 && dedup_threshold <= 1.0) {
            return Err(DocPipeError::Config(
                "deduplication threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        metrics.set_dedup_threshold(dedup_threshold);
        Ok(Self {
            entries: RwLock::new(Entries {
                ids: Vec::with_capacity(capacity),
                vecs: Vec::with_capacity(capacity),
            }),
            dedup_threshold,
            metrics,
        })
    }

    /// Decide whether `doc` duplicates a stored document, storing it if not.
    pub fn dedup_and_index(&self, doc: EmbeddedDoc) -> DedupResult {
        debug!(id = %doc.id, "Processing document for dedup and indexing");
        self.metrics.inc_documents_processed();

        let nearest = self.scan(&doc.embedding);
        self.commit(doc, nearest)
    }

    /// Nearest stored entry, found on an unlocked snapshot.
    fn scan(&self, embedding: &[f32]) -> Nearest {
        let (ids, vecs) = self.snapshot();

        let mut best_id: Option<&Arc<str>> = None;
        let mut best_score = 0.0f32;
        for (id, vec) in ids.iter().zip(vecs.iter()) {
            let score = similarity(embedding, vec);
            if score > best_score {
                best_score = score;
                best_id = Some(id);
            }
        }

        Nearest {
            id: best_id.map(|id| id.to_string()).unwrap_or_default(),
            score: best_score,
        }
    }

    /// Apply a scan outcome. The index may have grown since the scan; that
    /// window is not re-checked.
    fn commit(&self, doc: EmbeddedDoc, nearest: Nearest) -> DedupResult {
        let is_duplicate = nearest.score >= self.dedup_threshold;
        debug!(
            id = %doc.id,
            nearest = %nearest.id,
            similarity = nearest.score,
            is_duplicate,
            "Nearest neighbor found"
        );

        if is_duplicate {
            self.metrics.inc_duplicate_documents();
        } else {
            let id: Arc<str> = Arc::from(doc.id.as_str());
            let vec: Arc<[f32]> = Arc::from(doc.embedding);
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.ids.push(id);
            entries.vecs.push(vec);
        }

        DedupResult {
            id: doc.id,
            is_duplicate,
            nearest_id: nearest.id,
            similarity: nearest.score,
        }
    }

    /// Return the `k` stored entries most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let (ids, vecs) = self.snapshot();

        let mut scored: Vec<SearchHit> = ids
            .into_iter()
            .zip(vecs.iter())
            .map(|(id, vec)| SearchHit {
                id,
                score: similarity(query, vec),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Point-in-time copy of the stored ids, in insertion order.
    pub fn ids(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.ids.iter().map(|id| id.to_string()).collect()
    }

    /// Return the number of embeddings currently stored.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn threshold(&self) -> f32 {
        self.dedup_threshold
    }

    fn snapshot(&self) -> (Vec<Arc<str>>, Vec<Arc<[f32]>>) {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        (entries.ids.clone(), entries.vecs.clone())
    }
}

/// Cosine similarity of two unit vectors, i.e. their dot product.
///
/// Vectors of different lengths are compared over their common prefix.
fn similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
