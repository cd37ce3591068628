//! The four-stage document chain: load -> tokenize -> embed -> index.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use docpipe_core::cancel::CancellationSignal;
use docpipe_core::config::DocPipeConfig;
use docpipe_core::error::Result;
use docpipe_core::metrics::{IndexMetrics, StageMetrics};
use docpipe_core::types::{DataLoadingConfig, DedupResult, EmbeddedDoc, TokenizedDoc};
use docpipe_vector::{Embedder, EmbeddingIndex};

use crate::ingest;
use crate::stage::{Stage, StageSummary};
use crate::tokenize;

pub const LOAD_STAGE: &str = "load";
pub const TOKENIZE_STAGE: &str = "tokenize";
pub const EMBED_STAGE: &str = "embed";
pub const INDEX_STAGE: &str = "index";

/// A running chain.
#[derive(Debug)]
pub struct DocPipeline {
    /// Dedup decisions, in no particular order. Closes once every stage has
    /// drained or been cancelled.
    pub results: mpsc::Receiver<DedupResult>,
    /// The index the final stage writes into.
    pub index: Arc<EmbeddingIndex>,
    pub stages: StageHandles,
}

impl DocPipeline {
    /// Build and start every stage over `requests`.
    ///
    /// The embedder and index are constructed before any stage starts, so an
    /// invalid dimension or threshold fails here without spawning anything.
    pub fn spawn<M>(
        config: &DocPipeConfig,
        requests: mpsc::Receiver<DataLoadingConfig>,
        metrics: Arc<M>,
        cancel: &CancellationSignal,
    ) -> Result<Self>
    where
        M: StageMetrics + IndexMetrics + 'static,
    {
        let embedder = Embedder::new(config.embedding.dimensions)?;
        let index_metrics: Arc<dyn IndexMetrics> = metrics.clone();
        let index = Arc::new(EmbeddingIndex::with_capacity(
            config.index.dedup_threshold,
            config.index.initial_capacity,
            index_metrics,
        )?);
        let stage_metrics: Arc<dyn StageMetrics> = metrics;
        let stages = &config.stages;

        let (documents, load_handle) = Stage::new(
            LOAD_STAGE,
            stages.load.workers,
            stages.load.buffer_size,
            requests,
            |request: DataLoadingConfig| ingest::load_data(&request),
            Arc::clone(&stage_metrics),
        )
        .spawn(cancel);

        let (tokenized, tokenize_handle) = Stage::new(
            TOKENIZE_STAGE,
            stages.tokenize.workers,
            stages.tokenize.buffer_size,
            documents,
            tokenize::tokenize,
            Arc::clone(&stage_metrics),
        )
        .spawn(cancel);

        let (embedded, embed_handle) = Stage::new(
            EMBED_STAGE,
            stages.embed.workers,
            stages.embed.buffer_size,
            tokenized,
            move |doc: TokenizedDoc| embedder.embed_doc(doc),
            Arc::clone(&stage_metrics),
        )
        .spawn(cancel);

        let indexer = Arc::clone(&index);
        let (results, index_handle) = Stage::new(
            INDEX_STAGE,
            stages.index.workers,
            stages.index.buffer_size,
            embedded,
            move |doc: EmbeddedDoc| Ok(indexer.dedup_and_index(doc)),
            stage_metrics,
        )
        .spawn(cancel);

        info!(
            dimensions = embedder.dimensions(),
            dedup_threshold = index.threshold(),
            "Document pipeline started"
        );

        Ok(Self {
            results,
            index,
            stages: StageHandles {
                handles: vec![load_handle, tokenize_handle, embed_handle, index_handle],
            },
        })
    }
}

/// Supervisor handles for every stage, upstream first.
#[derive(Debug)]
pub struct StageHandles {
    handles: Vec<JoinHandle<StageSummary>>,
}

impl StageHandles {
    /// Wait for every stage to close its output and collect the summaries.
    ///
    /// The results receiver must be drained (or dropped) first, otherwise
    /// the last stage can block on a full output buffer.
    pub async fn join(self) -> Vec<StageSummary> {
        let mut summaries = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!(error = %e, "Stage supervisor failed"),
            }
        }
        summaries
    }
}
