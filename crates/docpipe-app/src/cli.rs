//! CLI argument definitions for the docpipe binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use docpipe_core::config::DocPipeConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DOCPIPE_CONFIG";
/// Config file used when neither `--config` nor the env var is set.
pub const DEFAULT_CONFIG_FILE: &str = "docpipe.toml";

/// docpipe: stream random windows of a text file through
/// load -> tokenize -> embed -> dedup and print each decision.
#[derive(Parser, Debug)]
#[command(name = "docpipe", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level or filter directive (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Source text file to sample documents from.
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Load requests generated per second.
    #[arg(short = 'r', long = "rate")]
    pub rate: Option<u32>,

    /// Similarity at or above which a document is a duplicate.
    #[arg(short = 't', long = "threshold")]
    pub threshold: Option<f32>,

    /// Embedding vector length.
    #[arg(short = 'd', long = "dimensions")]
    pub dimensions: Option<usize>,

    /// Stop generating after this many documents.
    #[arg(short = 'n', long = "max-docs")]
    pub max_docs: Option<u64>,

    /// Cancel the run after this many seconds.
    #[arg(long = "duration-secs")]
    pub duration_secs: Option<u64>,

    /// Print results as JSON lines instead of debug form.
    #[arg(long = "json")]
    pub json: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > DOCPIPE_CONFIG env var > ./docpipe.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Resolve the tracing filter directive.
    ///
    /// Priority: --log-level flag > RUST_LOG env var > config file value.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.is_empty() {
                return filter;
            }
        }
        config_level.to_string()
    }

    /// Overwrite config values with any flags that were given.
    pub fn apply_overrides(&self, config: &mut DocPipeConfig) {
        if let Some(ref file) = self.file {
            config.load.file_path = file.clone();
            // A size configured for a different file no longer applies.
            config.load.file_size = None;
        }
        if let Some(rate) = self.rate {
            config.load.rate_per_sec = rate;
        }
        if let Some(threshold) = self.threshold {
            config.index.dedup_threshold = threshold;
        }
        if let Some(dimensions) = self.dimensions {
            config.embedding.dimensions = dimensions;
        }
        if let Some(max_docs) = self.max_docs {
            config.load.max_documents = Some(max_docs);
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }
}
