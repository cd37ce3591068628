//! Synthetic load: a paced stream of random byte-range requests.
//!
//! Each tick emits one `DataLoadingConfig` pointing at a random window of
//! the source file. Ids are `{prefix}-{counter}` with the counter starting
//! at 0. Text sizes are drawn uniformly from the configured range after
//! clamping it to the file; offsets are drawn so the window fits the file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use docpipe_core::cancel::CancellationSignal;
use docpipe_core::config::LoadConfig;
use docpipe_core::metrics::LoadMetrics;
use docpipe_core::types::DataLoadingConfig;

/// Request buffer used when the generator is built with 0.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadGeneratorConfig {
    pub min_text_size: usize,
    pub max_text_size: usize,
    pub id_prefix: String,
    pub rate_per_sec: u32,
    pub file_path: PathBuf,
    /// Size of `file_path` in bytes. Bounds every generated window.
    pub file_size: u64,
    /// Stop after this many requests. `None` runs until cancelled.
    pub max_documents: Option<u64>,
}

impl LoadGeneratorConfig {
    /// Build from the `[load]` config section and the detected file size.
    pub fn from_config(load: &LoadConfig, file_size: u64) -> Self {
        Self {
            min_text_size: load.min_text_size,
            max_text_size: load.max_text_size,
            id_prefix: load.id_prefix.clone(),
            rate_per_sec: load.rate_per_sec,
            file_path: load.file_path.clone(),
            file_size,
            max_documents: load.max_documents,
        }
    }

    /// Never zero: `tokio::time::interval` panics on a zero period.
    fn tick_period(&self) -> Duration {
        (Duration::from_secs(1) / self.rate_per_sec.max(1)).max(Duration::from_nanos(1))
    }
}

pub struct LoadGenerator {
    config: LoadGeneratorConfig,
    buffer_size: usize,
    rng: StdRng,
    metrics: Arc<dyn LoadMetrics>,
}

impl LoadGenerator {
    pub fn new(
        config: LoadGeneratorConfig,
        buffer_size: usize,
        metrics: Arc<dyn LoadMetrics>,
    ) -> Self {
        Self::with_rng(config, buffer_size, StdRng::from_os_rng(), metrics)
    }

    /// Deterministic generator for reproducible runs.
    pub fn with_seed(
        config: LoadGeneratorConfig,
        buffer_size: usize,
        seed: u64,
        metrics: Arc<dyn LoadMetrics>,
    ) -> Self {
        Self::with_rng(config, buffer_size, StdRng::seed_from_u64(seed), metrics)
    }

    fn with_rng(
        config: LoadGeneratorConfig,
        buffer_size: usize,
        rng: StdRng,
        metrics: Arc<dyn LoadMetrics>,
    ) -> Self {
        let buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };
        Self {
            config,
            buffer_size,
            rng,
            metrics,
        }
    }

    /// Start emitting requests. The channel closes on cancellation, after
    /// `max_documents` requests, or when the receiver is dropped.
    pub fn run(self, cancel: &CancellationSignal) -> mpsc::Receiver<DataLoadingConfig> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let cancel = cancel.clone();
        let Self {
            config,
            mut rng,
            metrics,
            ..
        } = self;

        info!(
            file = %config.file_path.display(),
            file_size = config.file_size,
            rate_per_sec = config.rate_per_sec,
            max_documents = ?config.max_documents,
            "Load generator started"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.tick_period());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut counter: u64 = 0;

            loop {
                if config.max_documents.is_some_and(|max| counter >= max) {
                    info!(emitted = counter, "Load generator reached max documents");
                    break;
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let request = generate_request(&config, counter, &mut rng);
                metrics.inc_load_requests(1);
                metrics.record_requested_text_size(request.text_size);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(request) => {
                        if sent.is_err() {
                            debug!("Load generator receiver dropped");
                            break;
                        }
                    }
                }
                counter += 1;
            }

            info!(emitted = counter, "Load generator stopped");
        });

        rx
    }
}

/// Draw one request.
///
/// The size range is clamped in order: `min >= 1`, `max >= min`,
/// `max <= file_size`, `min <= file_size`. An empty file therefore yields
/// zero-length requests at offset 0.
pub fn generate_request<R: Rng + ?Sized>(
    config: &LoadGeneratorConfig,
    counter: u64,
    rng: &mut R,
) -> DataLoadingConfig {
    let file_size = config.file_size;
    let mut min = (config.min_text_size as u64).max(1);
    let mut max = (config.max_text_size as u64).max(min);
    max = max.min(file_size);
    min = min.min(file_size);

    let text_size = if max <= min {
        min
    } else {
        rng.random_range(min..=max)
    };

    let max_offset = file_size.saturating_sub(text_size);
    let offset = if max_offset == 0 {
        0
    } else {
        rng.random_range(0..=max_offset)
    };

    DataLoadingConfig {
        id: format!("{}-{}", config.id_prefix, counter),
        file_path: config.file_path.clone(),
        offset,
        text_size: text_size as usize,
    }
}
