//! Metrics collaborator for the pipeline.
//!
//! Stages, the embedding index and the load generator report through the
//! narrow traits below. Callers inject an implementation at construction;
//! there is no process-wide registry. `PipelineMetrics` is the in-memory
//! recorder used by the binary, `NoopMetrics` discards everything.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bounds (milliseconds) of the processing latency histogram buckets.
/// A final implicit bucket catches everything above the last bound.
pub const LATENCY_BUCKETS_MS: [f64; 16] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0,
    500.0,
];

pub trait StageMetrics: Send + Sync {
    /// Time from dequeue to successful downstream send.
    fn record_processing_latency(&self, stage: &str, latency: Duration);
    /// An item was taken off the stage input.
    fn inc_stage_processed(&self, stage: &str);
    /// The transform failed and the item was dropped.
    fn inc_stage_errors(&self, stage: &str);
}

pub trait IndexMetrics: Send + Sync {
    fn set_dedup_threshold(&self, threshold: f32);
    fn inc_documents_processed(&self);
    fn inc_duplicate_documents(&self);
}

pub trait LoadMetrics: Send + Sync {
    fn inc_load_requests(&self, n: u64);
    fn record_requested_text_size(&self, size: usize);
}

/// Metrics sink that drops every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl StageMetrics for NoopMetrics {
    fn record_processing_latency(&self, _stage: &str, _latency: Duration) {}
    fn inc_stage_processed(&self, _stage: &str) {}
    fn inc_stage_errors(&self, _stage: &str) {}
}

impl IndexMetrics for NoopMetrics {
    fn set_dedup_threshold(&self, _threshold: f32) {}
    fn inc_documents_processed(&self) {}
    fn inc_duplicate_documents(&self) {}
}

impl LoadMetrics for NoopMetrics {
    fn inc_load_requests(&self, _n: u64) {}
    fn record_requested_text_size(&self, _size: usize) {}
}

// ---------------------------------------------------------------------------
// PipelineMetrics - in-memory recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct StageStats {
    processed: u64,
    errors: u64,
    latency_count: u64,
    latency_sum_ms: f64,
    latency_buckets: [u64; LATENCY_BUCKETS_MS.len() + 1],
}

impl StageStats {
    fn observe(&mut self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        let bucket = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.latency_buckets[bucket] += 1;
        self.latency_count += 1;
        self.latency_sum_ms += ms;
    }

    fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            processed: self.processed,
            errors: self.errors,
            delivered: self.latency_count,
            mean_latency_ms: if self.latency_count == 0 {
                0.0
            } else {
                self.latency_sum_ms / self.latency_count as f64
            },
            latency_buckets: self.latency_buckets.to_vec(),
        }
    }
}

/// Thread-safe in-memory metrics recorder.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    load_requests: AtomicU64,
    requested_bytes: AtomicU64,
    stages: Mutex<BTreeMap<String, StageStats>>,
    dedup_threshold_bits: AtomicU32,
    documents_processed: AtomicU64,
    duplicate_documents: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stage(&self, stage: &str, f: impl FnOnce(&mut StageStats)) {
        let mut stages = self.stages.lock().unwrap_or_else(PoisonError::into_inner);
        f(stages.entry(stage.to_string()).or_default());
    }

    /// Take a point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let stages = self
            .stages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect();

        MetricsSnapshot {
            taken_at: Utc::now(),
            load_requests: self.load_requests.load(Ordering::Relaxed),
            requested_bytes: self.requested_bytes.load(Ordering::Relaxed),
            stages,
            dedup_threshold: f32::from_bits(self.dedup_threshold_bits.load(Ordering::Relaxed)),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            duplicate_documents: self.duplicate_documents.load(Ordering::Relaxed),
        }
    }
}

impl StageMetrics for PipelineMetrics {
    fn record_processing_latency(&self, stage: &str, latency: Duration) {
        self.with_stage(stage, |s| s.observe(latency));
    }

    fn inc_stage_processed(&self, stage: &str) {
        self.with_stage(stage, |s| s.processed += 1);
    }

    fn inc_stage_errors(&self, stage: &str) {
        self.with_stage(stage, |s| s.errors += 1);
    }
}

impl IndexMetrics for PipelineMetrics {
    fn set_dedup_threshold(&self, threshold: f32) {
        self.dedup_threshold_bits
            .store(threshold.to_bits(), Ordering::Relaxed);
    }

    fn inc_documents_processed(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_duplicate_documents(&self) {
        self.duplicate_documents.fetch_add(1, Ordering::Relaxed);
    }
}

impl LoadMetrics for PipelineMetrics {
    fn inc_load_requests(&self, n: u64) {
        self.load_requests.fetch_add(n, Ordering::Relaxed);
    }

    fn record_requested_text_size(&self, size: usize) {
        self.requested_bytes
            .fetch_add(size as u64, Ordering::Relaxed);
    }
}

/// Per-stage counters at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub processed: u64,
    pub errors: u64,
    /// Items sent downstream (one latency observation each).
    pub delivered: u64,
    pub mean_latency_ms: f64,
    /// Counts per `LATENCY_BUCKETS_MS` bound, plus one overflow bucket.
    pub latency_buckets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub load_requests: u64,
    pub requested_bytes: u64,
    pub stages: BTreeMap<String, StageSnapshot>,
    pub dedup_threshold: f32,
    pub documents_processed: u64,
    pub duplicate_documents: u64,
}

impl MetricsSnapshot {
    /// Fraction of indexed documents flagged as duplicates.
    pub fn duplicate_ratio(&self) -> f64 {
        if self.documents_processed == 0 {
            0.0
        } else {
            self.duplicate_documents as f64 / self.documents_processed as f64
        }
    }
}
