//! Streaming document pipeline.
//!
//! Generic bounded worker-pool stages ([`stage::Stage`]) chained into
//! load -> tokenize -> embed -> index ([`chain::DocPipeline`]), plus the
//! load generator that feeds the chain.

pub mod chain;
pub mod ingest;
pub mod load;
pub mod stage;
pub mod tokenize;

pub use chain::{DocPipeline, StageHandles};
pub use load::{LoadGenerator, LoadGeneratorConfig};
pub use stage::{Stage, StageSummary};
