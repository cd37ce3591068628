use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DocPipeError, Result};

/// Highest generator rate with a nonzero tick period (one request per ns).
pub const MAX_RATE_PER_SEC: u32 = 1_000_000_000;

/// Top-level configuration for the docpipe binary.
///
/// Loaded from `./docpipe.toml` unless the CLI or `DOCPIPE_CONFIG` names
/// another file. Every section falls back to its defaults when omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocPipeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl DocPipeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed. Does not log,
    /// so it can run before the tracing subscriber is installed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DocPipeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, or `None` if there is no file
    /// at `path`. A file that exists but does not parse is still an error.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>> {
        match Self::load(path) {
            Ok(config) => Ok(Some(config)),
            Err(DocPipeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reject values the pipeline cannot start with.
    ///
    /// Worker counts and buffer sizes are not checked here: stages
    /// normalize non-positive values themselves.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.index.dedup_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(DocPipeError::Config(format!(
                "index.dedup_threshold must be in (0.0, 1.0], got {}",
                threshold
            )));
        }
        if self.embedding.dimensions == 0 {
            return Err(DocPipeError::Config(
                "embedding.dimensions must be at least 1".to_string(),
            ));
        }
        if self.load.rate_per_sec == 0 || self.load.rate_per_sec > MAX_RATE_PER_SEC {
            return Err(DocPipeError::Config(format!(
                "load.rate_per_sec must be in 1..={}, got {}",
                MAX_RATE_PER_SEC, self.load.rate_per_sec
            )));
        }
        if self.load.min_text_size > self.load.max_text_size {
            warn!(
                min = self.load.min_text_size,
                max = self.load.max_text_size,
                "load.min_text_size exceeds max_text_size; every document will use min_text_size"
            );
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Load generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Source text file that documents are sliced from.
    pub file_path: PathBuf,
    /// Size of `file_path` in bytes. Read from the file when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Smallest document to request, in bytes.
    pub min_text_size: usize,
    /// Largest document to request, in bytes.
    pub max_text_size: usize,
    /// Prefix for generated document ids.
    pub id_prefix: String,
    /// Requests emitted per second.
    pub rate_per_sec: u32,
    /// Capacity of the generator output channel.
    pub buffer_size: usize,
    /// Stop after this many requests. Unlimited when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_documents: Option<u64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from("data/shakespeare.txt"),
            file_size: None,
            min_text_size: 1_000,
            max_text_size: 20_000,
            id_prefix: "doc".to_string(),
            rate_per_sec: 1_000,
            buffer_size: 100,
            max_documents: None,
        }
    }
}

/// Worker pool sizing for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    pub workers: usize,
    pub buffer_size: usize,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            buffer_size: 100,
        }
    }
}

/// Per-stage worker pool settings, one table per chain position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub load: StageSettings,
    pub tokenize: StageSettings,
    pub embed: StageSettings,
    pub index: StageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Number of feature-hashing buckets.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimensions: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Similarity at or above which a document is a duplicate.
    pub dedup_threshold: f32,
    /// Preallocated slots in the index arrays.
    pub initial_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.8,
            initial_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between metrics snapshots in the log. 0 disables reporting.
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 10,
        }
    }
}
