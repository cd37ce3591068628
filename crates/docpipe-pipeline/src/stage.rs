//! Bounded worker-pool pipeline stage.
//!
//! A `Stage<I, O>` reads items from one bounded channel, applies a fallible
//! transform with a fixed number of concurrent workers, and writes the
//! results to a new bounded channel. Stages chain by handing one stage's
//! output receiver to the next stage's constructor.
//!
//! Guarantees:
//! - A failing (or panicking) transform drops that one item, counts an
//!   error and keeps the worker running.
//! - Every worker waits on the shared cancellation signal both while
//!   receiving and while sending, so a cancelled chain cannot deadlock on a
//!   full downstream buffer.
//! - The output channel closes only after every worker has been joined.
//! - Output order is unspecified.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use docpipe_core::cancel::CancellationSignal;
use docpipe_core::error::{DocPipeError, Result};
use docpipe_core::metrics::StageMetrics;

/// Output buffer capacity used when a stage is built with 0.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

type Transform<I, O> = Arc<dyn Fn(I) -> Result<O> + Send + Sync>;

/// Counts reported by a stage once its output channel has closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub name: String,
    pub workers: usize,
    /// Items taken off the input channel.
    pub received: u64,
    /// Items whose transform failed.
    pub failed: u64,
    /// Items sent downstream.
    pub delivered: u64,
    /// Whether the stage stopped because of cancellation.
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerCounts {
    received: u64,
    failed: u64,
    delivered: u64,
}

pub struct Stage<I, O> {
    name: Arc<str>,
    workers: usize,
    buffer_size: usize,
    input: mpsc::Receiver<I>,
    transform: Transform<I, O>,
    metrics: Arc<dyn StageMetrics>,
}

impl<I, O> std::fmt::Debug for Stage<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a stage. A worker count of 0 becomes 1 and a buffer size of 0
    /// becomes [`DEFAULT_BUFFER_SIZE`].
    pub fn new<F>(
        name: impl Into<String>,
        workers: usize,
        buffer_size: usize,
        input: mpsc::Receiver<I>,
        transform: F,
        metrics: Arc<dyn StageMetrics>,
    ) -> Self
    where
        F: Fn(I) -> Result<O> + Send + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let workers = workers.max(1);
        let buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };
        info!(stage = %name, workers, buffer_size, "Creating stage");

        Self {
            name,
            workers,
            buffer_size,
            input,
            transform: Arc::new(transform),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Start the workers and return the bounded output channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(self, cancel: &CancellationSignal) -> mpsc::Receiver<O> {
        self.spawn(cancel).0
    }

    /// Like [`Stage::run`], also returning a handle that resolves to the
    /// stage summary after the output channel has closed.
    pub fn spawn(
        self,
        cancel: &CancellationSignal,
    ) -> (mpsc::Receiver<O>, JoinHandle<StageSummary>) {
        let (output, receiver) = mpsc::channel(self.buffer_size);
        let input = Arc::new(Mutex::new(self.input));
        info!(
            stage = %self.name,
            workers = self.workers,
            buffer_size = self.buffer_size,
            "Starting stage run"
        );

        let mut pool = JoinSet::new();
        for id in 0..self.workers {
            let worker = Worker {
                id,
                stage: Arc::clone(&self.name),
                input: Arc::clone(&input),
                output: output.clone(),
                transform: Arc::clone(&self.transform),
                metrics: Arc::clone(&self.metrics),
                cancel: cancel.clone(),
            };
            pool.spawn(worker.run());
        }

        let name = self.name;
        let workers = self.workers;
        let cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut summary = StageSummary {
                name: name.to_string(),
                workers,
                ..StageSummary::default()
            };

            while let Some(joined) = pool.join_next().await {
                match joined {
                    Ok(counts) => {
                        summary.received += counts.received;
                        summary.failed += counts.failed;
                        summary.delivered += counts.delivered;
                    }
                    Err(e) => error!(stage = %name, error = %e, "Stage worker aborted"),
                }
            }

            // Every worker is joined; only now may downstream see the close.
            drop(output);
            summary.cancelled = cancel.is_cancelled();
            info!(
                stage = %name,
                received = summary.received,
                failed = summary.failed,
                delivered = summary.delivered,
                cancelled = summary.cancelled,
                "Stage output closed"
            );
            summary
        });

        (receiver, handle)
    }
}

struct Worker<I, O> {
    id: usize,
    stage: Arc<str>,
    input: Arc<Mutex<mpsc::Receiver<I>>>,
    output: mpsc::Sender<O>,
    transform: Transform<I, O>,
    metrics: Arc<dyn StageMetrics>,
    cancel: CancellationSignal,
}

impl<I, O> Worker<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(self) -> WorkerCounts {
        let mut counts = WorkerCounts::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(stage = %self.stage, worker = self.id, "Stage worker cancelled");
                    break;
                }
                _ = self.output.closed() => {
                    debug!(stage = %self.stage, worker = self.id, "Downstream receiver dropped");
                    break;
                }
                item = recv_shared(&self.input) => item,
            };

            let Some(item) = next else {
                debug!(stage = %self.stage, worker = self.id, "Stage input closed");
                break;
            };

            counts.received += 1;
            self.metrics.inc_stage_processed(&self.stage);
            let started = Instant::now();

            let value = match self.apply(item).await {
                Ok(value) => value,
                Err(e) => {
                    error!(stage = %self.stage, worker = self.id, error = %e, "Transform failed, dropping item");
                    counts.failed += 1;
                    self.metrics.inc_stage_errors(&self.stage);
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(stage = %self.stage, worker = self.id, "Stage worker cancelled during send");
                    break;
                }
                sent = self.output.send(value) => {
                    if sent.is_err() {
                        debug!(stage = %self.stage, worker = self.id, "Downstream receiver dropped");
                        break;
                    }
                    counts.delivered += 1;
                    self.metrics.record_processing_latency(&self.stage, started.elapsed());
                }
            }
        }

        counts
    }

    /// Run the transform on the blocking pool. A panic becomes an item error.
    async fn apply(&self, item: I) -> Result<O> {
        let transform = Arc::clone(&self.transform);
        match tokio::task::spawn_blocking(move || transform(item)).await {
            Ok(result) => result,
            Err(e) => Err(DocPipeError::Transform(format!("transform panicked: {}", e))),
        }
    }
}

async fn recv_shared<I>(input: &Mutex<mpsc::Receiver<I>>) -> Option<I> {
    input.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpipe_core::metrics::PipelineMetrics;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn collect<O>(mut rx: mpsc::Receiver<O>) -> Vec<O> {
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(v) = rx.recv().await {
                out.push(v);
            }
        })
        .await
        .expect("stage output should close");
        out
    }

    fn counts(values: &[i32]) -> HashMap<i32, usize> {
        let mut map = HashMap::new();
        for v in values {
            *map.entry(*v).or_insert(0) += 1;
        }
        map
    }

    #[test]
    fn test_new_normalizes_sizes() {
        let (_tx, rx) = mpsc::channel::<i32>(1);
        let stage = Stage::new("norm", 0, 0, rx, |x: i32| Ok(x), Arc::new(PipelineMetrics::new()));
        assert_eq!(stage.workers(), 1);
        assert_eq!(stage.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(stage.name(), "norm");
    }

    #[tokio::test]
    async fn test_basic_processing() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (tx, rx) = mpsc::channel(10);
        let stage = Stage::new("multiply", 1, 10, rx, |x: i32| Ok(x * 2), metrics.clone());
        let out = stage.run(&CancellationSignal::new());

        for v in 1..=5 {
            tx.send(v).await.unwrap();
        }
        drop(tx);

        let results = collect(out).await;
        assert_eq!(counts(&results), counts(&[2, 4, 6, 8, 10]));

        let snap = metrics.snapshot();
        assert_eq!(snap.stages["multiply"].processed, 5);
        assert_eq!(snap.stages["multiply"].delivered, 5);
        assert_eq!(snap.stages["multiply"].errors, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_multiple_workers() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (tx, rx) = mpsc::channel(20);
        let stage = Stage::new(
            "slow-multiply",
            3,
            20,
            rx,
            |x: i32| {
                std::thread::sleep(Duration::from_millis(10));
                Ok(x * 2)
            },
            metrics.clone(),
        );
        let (out, handle) = stage.spawn(&CancellationSignal::new());

        for v in 1..=10 {
            tx.send(v).await.unwrap();
        }
        drop(tx);

        let results = collect(out).await;
        let expected: Vec<i32> = (1..=10).map(|x| x * 2).collect();
        assert_eq!(counts(&results), counts(&expected));

        let summary = handle.await.unwrap();
        assert_eq!(summary.workers, 3);
        assert_eq!(summary.received, 10);
        assert_eq!(summary.delivered, 10);
        assert!(!summary.cancelled);
        assert_eq!(metrics.snapshot().stages["slow-multiply"].delivered, 10);
    }

    #[tokio::test]
    async fn test_error_items_dropped_stage_continues() {
        let metrics = Arc::new(PipelineMetrics::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let (tx, rx) = mpsc::channel(10);
        let stage = Stage::new(
            "error-handling",
            1,
            20,
            rx,
            move |x: i32| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                if x % 2 == 0 {
                    Err(DocPipeError::Transform("even number".to_string()))
                } else {
                    Ok(x * 2)
                }
            },
            metrics.clone(),
        );
        let (out, handle) = stage.spawn(&CancellationSignal::new());

        for v in 1..=5 {
            tx.send(v).await.unwrap();
        }
        drop(tx);

        let results = collect(out).await;
        assert_eq!(counts(&results), counts(&[2, 6, 10]));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let summary = handle.await.unwrap();
        assert_eq!(summary.received, 5);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.delivered, 3);

        let snap = metrics.snapshot();
        assert_eq!(snap.stages["error-handling"].errors, 2);
        assert_eq!(snap.stages["error-handling"].delivered, 3);
    }

    #[tokio::test]
    async fn test_panicking_transform_is_isolated() {
        let (tx, rx) = mpsc::channel(10);
        let stage = Stage::new(
            "panicky",
            1,
            10,
            rx,
            |x: i32| {
                if x == 2 {
                    panic!("bad item");
                }
                Ok(x)
            },
            Arc::new(PipelineMetrics::new()),
        );
        let (out, handle) = stage.spawn(&CancellationSignal::new());

        for v in 1..=4 {
            tx.send(v).await.unwrap();
        }
        drop(tx);

        let results = collect(out).await;
        assert_eq!(counts(&results), counts(&[1, 3, 4]));
        assert_eq!(handle.await.unwrap().failed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_output_closes_after_all_items_attempted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let (tx, rx) = mpsc::channel(64);
        let stage = Stage::new(
            "closure",
            4,
            64,
            rx,
            move |x: i32| {
                std::thread::sleep(Duration::from_millis(2));
                calls_in.fetch_add(1, Ordering::SeqCst);
                if x % 5 == 0 {
                    Err(DocPipeError::Transform("multiple of five".to_string()))
                } else {
                    Ok(x)
                }
            },
            Arc::new(PipelineMetrics::new()),
        );
        let out = stage.run(&CancellationSignal::new());

        let k = 50;
        for v in 0..k {
            tx.send(v).await.unwrap();
        }
        drop(tx);

        let results = collect(out).await;
        // Observed close implies every item was attempted.
        assert_eq!(calls.load(Ordering::SeqCst), k as usize);
        let expected: Vec<i32> = (0..k).filter(|x| x % 5 != 0).collect();
        assert_eq!(counts(&results), counts(&expected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_closes_output_with_only_complete_items() {
        let metrics = Arc::new(PipelineMetrics::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let cancel = CancellationSignal::new();
        let (tx, rx) = mpsc::channel(10);
        let stage = Stage::new(
            "slow",
            2,
            20,
            rx,
            move |x: i32| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(200));
                Ok(x * 2)
            },
            metrics.clone(),
        );
        let (out, handle) = stage.spawn(&cancel);

        for v in 1..=4 {
            tx.send(v).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        // The input sender is still alive; only cancellation can close the output.
        let results = collect(out).await;
        for r in &results {
            assert!([2, 4, 6, 8].contains(r), "unexpected output {}", r);
        }
        assert!(calls.load(Ordering::SeqCst) <= 2);

        let summary = handle.await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.delivered as usize, results.len());
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancelled_before_run_processes_nothing() {
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let (tx, rx) = mpsc::channel(4);
        tx.send(1).await.unwrap();

        let stage = Stage::new(
            "precancelled",
            2,
            4,
            rx,
            move |x: i32| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                Ok(x)
            },
            Arc::new(PipelineMetrics::new()),
        );
        let results = collect(stage.run(&cancel)).await;

        assert!(results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backpressure_blocks_upstream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let (tx, rx) = mpsc::channel(16);
        let stage = Stage::new(
            "bounded",
            1,
            1,
            rx,
            move |x: i32| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                Ok(x)
            },
            Arc::new(PipelineMetrics::new()),
        );
        let out = stage.run(&CancellationSignal::new());

        for v in 0..10 {
            tx.send(v).await.unwrap();
        }
        drop(tx);

        // Nobody drains: one item fills the buffer, a second is transformed
        // and parked on send, the rest stay queued upstream.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let results = collect(out).await;
        assert_eq!(results.len(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_dropped_downstream_stops_workers() {
        let (tx, rx) = mpsc::channel(4);
        let stage = Stage::new("orphan", 1, 1, rx, |x: i32| Ok(x), Arc::new(PipelineMetrics::new()));
        let (out, handle) = stage.spawn(&CancellationSignal::new());
        drop(out);

        tx.send(1).await.unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("workers should exit once downstream is gone")
            .unwrap();
        assert_eq!(summary.delivered, 0);
        assert!(summary.received <= 1);
        drop(tx);
    }

    #[tokio::test]
    async fn test_chained_stages() {
        let metrics: Arc<PipelineMetrics> = Arc::new(PipelineMetrics::new());
        let cancel = CancellationSignal::new();
        let (tx, rx) = mpsc::channel(8);

        let first = Stage::new("add", 2, 4, rx, |x: i32| Ok(x + 1), metrics.clone());
        let second = Stage::new(
            "to-string",
            2,
            4,
            first.run(&cancel),
            |x: i32| Ok(x.to_string()),
            metrics.clone(),
        );
        let out = second.run(&cancel);

        tokio::spawn(async move {
            for v in 0..20 {
                tx.send(v).await.unwrap();
            }
        });

        let mut results = collect(out).await;
        results.sort_by_key(|s| s.parse::<i32>().unwrap());
        let expected: Vec<String> = (1..=20).map(|x| x.to_string()).collect();
        assert_eq!(results, expected);

        let snap = metrics.snapshot();
        assert_eq!(snap.stages["add"].processed, 20);
        assert_eq!(snap.stages["to-string"].delivered, 20);
    }
}
