//! Batched execution of one bulk operation.
//!
//! The executor partitions the target ids into consecutive chunks, invokes
//! the caller's handler per chunk, and absorbs handler failures into
//! per-item results: one failing chunk never stops the remaining chunks
//! from being attempted. Cancellation is cooperative and observed at the
//! checkpoint after each chunk.

use crate::engine::handler::{ActionHandler, ChunkOutcome, ItemOutcome};
use crate::engine::scheduler::Scheduler;
use crate::model::item::ItemId;
use crate::model::operation::{ActionKind, BulkItemResult, OperationId};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Executor tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutorOptions {
    /// Ids per handler invocation.
    pub batch_size: usize,

    /// Pause between consecutive chunks.
    #[serde(with = "humantime_serde")]
    pub inter_batch_delay: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            inter_batch_delay: Duration::from_millis(100),
        }
    }
}

/// Progress notification emitted after every chunk boundary.
#[derive(Debug, Clone)]
pub struct ChunkUpdate {
    pub operation_id: OperationId,
    pub chunk_index: usize,
    pub processed_delta: usize,
    pub failed_delta: usize,
}

/// How one execution run ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// All chunks attempted; per-item failures are part of the results.
    Completed(Vec<BulkItemResult>),

    /// Stopped at a cancellation checkpoint. Unattempted ids are absent
    /// from the results, not marked failed.
    Cancelled(Vec<BulkItemResult>),

    /// The handler broke its contract and the operation cannot proceed.
    Failed {
        error: String,
        results: Vec<BulkItemResult>,
    },
}

/// Drives one operation through its chunks.
pub struct BatchExecutor {
    pub operation_id: OperationId,
    pub action: ActionKind,
    pub item_ids: Vec<ItemId>,
    pub handler: Arc<dyn ActionHandler>,
    pub options: ExecutorOptions,
    pub cancel_token: CancellationToken,
    pub scheduler: Arc<dyn Scheduler>,
}

impl BatchExecutor {
    pub fn new(
        operation_id: OperationId,
        action: ActionKind,
        item_ids: Vec<ItemId>,
        handler: Arc<dyn ActionHandler>,
        options: ExecutorOptions,
        cancel_token: CancellationToken,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            operation_id,
            action,
            item_ids,
            handler,
            options,
            cancel_token,
            scheduler,
        }
    }

    /// Run every chunk in order, reporting progress through `on_update`
    /// after each chunk boundary.
    #[instrument(
        name = "bulk_execute",
        level = "info",
        fields(
            operation_id = %self.operation_id,
            action = %self.action,
            total = self.item_ids.len(),
        ),
        skip(self, on_update)
    )]
    pub async fn execute<F>(self, mut on_update: F) -> ExecutionOutcome
    where
        F: FnMut(ChunkUpdate) + Send,
    {
        // Zero-total operations complete immediately.
        if self.item_ids.is_empty() {
            debug!(operation_id = %self.operation_id, "Empty target list, completing immediately");
            return ExecutionOutcome::Completed(Vec::new());
        }

        let batch_size = self.options.batch_size.max(1);
        let chunk_count = self.item_ids.len().div_ceil(batch_size);
        let mut results: Vec<BulkItemResult> = Vec::with_capacity(self.item_ids.len());

        for (chunk_index, chunk) in self.item_ids.chunks(batch_size).enumerate() {
            let chunk_results = match self.run_chunk(chunk).await {
                Ok(chunk_results) => chunk_results,
                Err(violation) => {
                    return ExecutionOutcome::Failed {
                        error: violation,
                        results,
                    };
                }
            };

            let failed_delta = chunk_results.iter().filter(|r| !r.success).count();
            let processed_delta = chunk_results.len();
            results.extend(chunk_results);

            debug!(
                operation_id = %self.operation_id,
                chunk_index,
                processed_delta,
                failed_delta,
                "Chunk processed"
            );

            on_update(ChunkUpdate {
                operation_id: self.operation_id.clone(),
                chunk_index,
                processed_delta,
                failed_delta,
            });

            // Cancellation checkpoint: the chunk that was in flight keeps
            // its results, everything after it is skipped.
            if self.cancel_token.is_cancelled() {
                debug!(operation_id = %self.operation_id, chunk_index, "Cancellation observed at checkpoint");
                return ExecutionOutcome::Cancelled(results);
            }

            if chunk_index + 1 < chunk_count {
                self.scheduler.pause(self.options.inter_batch_delay).await;

                // The pause is a suspension point too; a cancel that lands
                // during the delay must stop the next chunk from starting.
                if self.cancel_token.is_cancelled() {
                    debug!(operation_id = %self.operation_id, chunk_index, "Cancellation observed during delay");
                    return ExecutionOutcome::Cancelled(results);
                }
            }
        }

        ExecutionOutcome::Completed(results)
    }

    /// Invoke the handler for one chunk and normalize whatever comes back.
    ///
    /// Handler errors become failure results for every id in the chunk.
    /// The only hard failure is a violated contract: a structured outcome
    /// list that does not cover exactly the chunk's ids.
    async fn run_chunk(&self, chunk: &[ItemId]) -> Result<Vec<BulkItemResult>, String> {
        match self.handler.apply(self.action, chunk).await {
            Ok(ChunkOutcome::AllSucceeded) => Ok(chunk
                .iter()
                .map(|id| BulkItemResult::succeeded(id.clone(), None))
                .collect()),

            Ok(ChunkOutcome::PerItem(outcomes)) => self.verbatim_outcomes(chunk, outcomes),

            Err(err) => {
                warn!(
                    operation_id = %self.operation_id,
                    error = %err,
                    chunk_len = chunk.len(),
                    "Handler failed, marking whole chunk failed"
                );
                let msg = err.to_string();
                Ok(chunk
                    .iter()
                    .map(|id| BulkItemResult::failed(id.clone(), msg.clone()))
                    .collect())
            }
        }
    }

    fn verbatim_outcomes(
        &self,
        chunk: &[ItemId],
        outcomes: Vec<ItemOutcome>,
    ) -> Result<Vec<BulkItemResult>, String> {
        if outcomes.len() != chunk.len() {
            return Err(format!(
                "handler returned {} outcomes for a chunk of {}",
                outcomes.len(),
                chunk.len()
            ));
        }

        let mut by_id: AHashMap<&str, ItemOutcome> = outcomes
            .iter()
            .map(|o| (o.item_id.as_str(), o.clone()))
            .collect();

        // Results are reported in chunk order regardless of how the handler
        // ordered them internally.
        let mut chunk_results = Vec::with_capacity(chunk.len());
        for id in chunk {
            let outcome = by_id
                .remove(id.as_str())
                .ok_or_else(|| format!("handler outcome missing for id '{id}'"))?;

            chunk_results.push(BulkItemResult {
                item_id: outcome.item_id,
                success: outcome.success,
                error: outcome.error,
                rollback: outcome.rollback,
            });
        }

        Ok(chunk_results)
    }
}
