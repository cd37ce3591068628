//! docpipe application binary - composition root.
//!
//! 1. Parse CLI flags, read the TOML config, install tracing, then validate
//! 2. Detect the source file size
//! 3. Start the load generator and the load -> tokenize -> embed -> index chain
//! 4. Print every dedup decision to stdout, log metrics periodically
//! 5. Cancel on Ctrl-C or `--duration-secs`, then drain and report

mod cli;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinHandle;

use docpipe_core::config::DocPipeConfig;
use docpipe_core::metrics::PipelineMetrics;
use docpipe_core::types::DedupResult;
use docpipe_core::CancellationSignal;
use docpipe_pipeline::ingest;
use docpipe_pipeline::{DocPipeline, LoadGenerator, LoadGeneratorConfig};

use cli::CliArgs;

/// Finish startup configuration once tracing is installed: report where
/// the config came from, apply CLI overrides and validate.
fn prepare_config(
    args: &CliArgs,
    path: &Path,
    file_config: Option<DocPipeConfig>,
) -> docpipe_core::Result<DocPipeConfig> {
    let mut config = match file_config {
        Some(config) => {
            tracing::info!(path = %path.display(), "Configuration loaded");
            config
        }
        None => {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            DocPipeConfig::default()
        }
    };
    args.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Log a metrics snapshot every `interval_secs` until cancelled.
fn spawn_reporter(
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
    cancel: CancellationSignal,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let snapshot = metrics.snapshot();
            tracing::info!(
                load_requests = snapshot.load_requests,
                documents_processed = snapshot.documents_processed,
                duplicate_documents = snapshot.duplicate_documents,
                duplicate_ratio = snapshot.duplicate_ratio(),
                "Pipeline progress"
            );
            for (stage, stats) in &snapshot.stages {
                tracing::debug!(
                    stage = %stage,
                    processed = stats.processed,
                    errors = stats.errors,
                    mean_latency_ms = stats.mean_latency_ms,
                    "Stage progress"
                );
            }
        }
    }))
}

/// Cancel on Ctrl-C, or once `duration` has elapsed.
fn spawn_shutdown_watch(cancel: CancellationSignal, duration: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                    return;
                }
                tracing::info!("Ctrl-C received, cancelling pipeline");
            }
            _ = deadline => tracing::info!("Run duration elapsed, cancelling pipeline"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}

fn write_result(
    out: &mut impl Write,
    result: &DedupResult,
    json: bool,
) -> docpipe_core::Result<()> {
    if json {
        serde_json::to_writer(&mut *out, result)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{:?}", result)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config_path = args.resolve_config_path();
    let file_config = DocPipeConfig::load_if_exists(&config_path)?;

    // Tracing. Logs go to stderr so stdout carries only results.
    let file_level = file_config
        .as_ref()
        .map_or("info", |config| config.general.log_level.as_str());
    let filter = args.resolve_log_filter(file_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let run_id = uuid::Uuid::new_v4();
    let started_at = chrono::Utc::now();
    tracing::info!(%run_id, "Starting docpipe v{}", env!("CARGO_PKG_VERSION"));

    let config = match prepare_config(&args, &config_path, file_config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    // Source file.
    let file_size = match config.load.file_size {
        Some(size) => size,
        None => match ingest::file_size(&config.load.file_path) {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(
                    path = %config.load.file_path.display(),
                    error = %e,
                    "Cannot read source file"
                );
                return Err(e.into());
            }
        },
    };
    tracing::info!(
        path = %config.load.file_path.display(),
        file_size,
        "Source file ready"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let cancel = CancellationSignal::new();

    let generator = LoadGenerator::new(
        LoadGeneratorConfig::from_config(&config.load, file_size),
        config.load.buffer_size,
        metrics.clone(),
    );
    let requests = generator.run(&cancel);
    let DocPipeline {
        mut results,
        index,
        stages,
    } = DocPipeline::spawn(&config, requests, metrics.clone(), &cancel)?;

    let reporter = spawn_reporter(
        Arc::clone(&metrics),
        config.metrics.report_interval_secs,
        cancel.clone(),
    );
    spawn_shutdown_watch(cancel.clone(), args.duration_secs.map(Duration::from_secs));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut printed: u64 = 0;
    while let Some(result) = results.recv().await {
        if let Err(e) = write_result(&mut out, &result, args.json) {
            tracing::error!(error = %e, "Failed to write result, cancelling pipeline");
            cancel.cancel();
            break;
        }
        printed += 1;
    }
    let _ = out.flush();
    drop(out);
    // Unblock the index stage if we stopped reading early.
    drop(results);

    let summaries = stages.join().await;
    for summary in &summaries {
        tracing::info!(
            stage = %summary.name,
            workers = summary.workers,
            received = summary.received,
            failed = summary.failed,
            delivered = summary.delivered,
            cancelled = summary.cancelled,
            "Stage finished"
        );
    }

    cancel.cancel();
    if let Some(handle) = reporter {
        let _ = handle.await;
    }

    let snapshot = metrics.snapshot();
    let elapsed = chrono::Utc::now() - started_at;
    tracing::info!(
        %run_id,
        printed,
        indexed = index.len(),
        duplicate_ratio = snapshot.duplicate_ratio(),
        elapsed_ms = elapsed.num_milliseconds(),
        "Run complete"
    );
    match serde_json::to_string(&snapshot) {
        Ok(json) => tracing::info!(snapshot = %json, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize final metrics"),
    }

    Ok(())
}
