pub mod cancel;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use cancel::CancellationSignal;
pub use config::DocPipeConfig;
pub use error::{DocPipeError, Result};
pub use metrics::{
    IndexMetrics, LoadMetrics, MetricsSnapshot, NoopMetrics, PipelineMetrics, StageMetrics,
};
pub use types::*;
