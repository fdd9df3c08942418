//! src/main.rs
//! Demo session driving the bulk operation engine against a simulated desk
//! backend: select, act in bulk, cancel, undo, and report statistics.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use bulkops_core::config::EngineConfig;
use bulkops_core::engine::handler::{ActionHandler, ChunkOutcome, HandlerError, ItemOutcome};
use bulkops_core::engine::scheduler::TokioScheduler;
use bulkops_core::engine::service::{BulkEngine, EngineEvent};
use bulkops_core::model::item::{ItemId, ItemKind};
use bulkops_core::model::operation::ActionKind;
use bulkops_core::model::rollback::{PositionSide, PositionSnapshot, RollbackItem, RollbackPayload};
use bulkops_core::persistence::FileStore;
use bulkops_core::Logger;

/// Simulated remote desk API: every seventh item is rejected, everything
/// else succeeds after capturing its rollback snapshot.
struct SimulatedDesk;

#[async_trait]
impl ActionHandler for SimulatedDesk {
    async fn apply(
        &self,
        action: ActionKind,
        chunk: &[ItemId],
    ) -> Result<ChunkOutcome, HandlerError> {
        let outcomes = chunk
            .iter()
            .enumerate()
            .map(|(idx, id)| {
                if idx % 7 == 6 {
                    ItemOutcome::failed(id.clone(), "risk check rejected")
                } else {
                    let rollback = match action {
                        ActionKind::Close => Some(RollbackItem::Close(PositionSnapshot {
                            item_id: id.clone(),
                            symbol: "ESZ5".into(),
                            side: PositionSide::Long,
                            quantity: 1.0,
                            entry_price: 5023.25,
                        })),
                        _ => None,
                    };
                    ItemOutcome::succeeded(id.clone(), rollback)
                }
            })
            .collect();

        Ok(ChunkOutcome::PerItem(outcomes))
    }

    async fn revert(&self, payload: &RollbackPayload) -> Result<(), HandlerError> {
        info!(items = payload.len(), action = %payload.action(), "Reverting");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    Logger::init_tracing();
    info!("Starting bulk operation engine demo");

    let config = EngineConfig::load().await.unwrap_or_else(|err| {
        warn!(error = %err, "Falling back to default configuration");
        EngineConfig::default()
    });

    let data_dir = EngineConfig::data_dir().context("Failed to resolve data directory")?;
    let store = Arc::new(FileStore::new(data_dir).context("Failed to open state store")?);

    let engine = BulkEngine::with_parts(config, Arc::new(TokioScheduler), Some(store));
    engine.register_handler(ItemKind::Position, Arc::new(SimulatedDesk));
    engine.hydrate().await.context("Failed to hydrate state")?;

    // Mirror progress to the log the way a UI subscription would.
    let mut events = engine.subscribe();
    let observer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::OperationProgress {
                    operation_id,
                    processed_items,
                    failed_items,
                    total_items,
                } => info!(
                    %operation_id,
                    processed = processed_items,
                    failed = failed_items,
                    total = total_items,
                    "Progress"
                ),
                EngineEvent::OperationFinished {
                    operation_id,
                    status,
                    ..
                } => {
                    info!(%operation_id, %status, "Finished");
                    break;
                }
                _ => {}
            }
        }
    });

    for i in 0..20 {
        engine.select(ItemKind::Position, ItemId::from(format!("pos-{i}")));
    }
    info!(
        selected = engine.selected_count(ItemKind::Position),
        "Selection ready"
    );

    let operation_id = engine
        .start(ActionKind::Close, ItemKind::Position)
        .context("Failed to start bulk close")?;
    observer.await.ok();

    let op = engine
        .operation(&operation_id)
        .context("Operation vanished from the log")?;
    info!(
        status = %op.status,
        processed = op.processed_items,
        failed = op.failed_items,
        remaining_selected = engine.selected_count(ItemKind::Position),
        "Bulk close done"
    );

    if op.can_undo {
        let entry = engine.undo().await.context("Undo failed")?;
        info!(description = %entry.description, "Undid last action");
    }

    info!(report = %engine.stats().report(), "Session statistics");
    Ok(())
}
