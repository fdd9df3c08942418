pub mod error;

pub mod config;

pub mod model {
    pub mod item;
    pub use item::{ItemId, ItemKind, SelectionMode};

    pub mod operation;
    pub use operation::{
        ActionKind, BulkItemResult, BulkOperation, OperationId, OperationStatus,
    };

    pub mod rollback;
    pub use rollback::{
        DeletedRecord, PositionSide, PositionSnapshot, RollbackItem, RollbackPayload,
        TagSnapshot, UndoableAction,
    };
}

pub mod engine {
    pub mod selection;
    pub use selection::{SelectionRegistry, SelectionState};

    pub mod lifecycle;
    pub use lifecycle::OperationLog;

    pub mod handler;
    pub use handler::{ActionHandler, ChunkOutcome, HandlerError, ItemOutcome};

    pub mod scheduler;
    pub use scheduler::{NoDelayScheduler, Scheduler, TokioScheduler};

    pub mod executor;
    pub use executor::{BatchExecutor, ChunkUpdate, ExecutionOutcome, ExecutorOptions};

    pub mod service;
    pub use service::{BulkEngine, EngineEvent};
}

pub mod persistence;

pub mod stats;

pub mod logging;
pub use logging::Logger;

pub use config::EngineConfig;
pub use engine::service::{BulkEngine, EngineEvent};
pub use error::{BulkError, BulkResult};
pub use model::{ActionKind, BulkOperation, ItemId, ItemKind, OperationStatus};
