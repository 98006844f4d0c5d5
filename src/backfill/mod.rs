//! Embedding backfill
//!
//! Walks entities missing a vector field, embeds them with bounded
//! concurrency, writes validated vectors in bulk and checkpoints progress.

mod checkpoint;
mod orchestrator;
mod reconcile;
mod report;
mod signals;

pub use checkpoint::{CheckpointStore, MemoryCheckpointStore};
pub use orchestrator::{BackfillOrchestrator, BackfillSettings, RunState, StopHandle};
pub use reconcile::{
    write_batch, BatchWrite, BulkWriteResult, BulkWriter, ItemOutcome, ItemResult,
    PendingTransaction, Submission, VectorUpdate,
};
pub use report::{BackfillReport, ErrorDetail};
pub use signals::spawn_stop_listener;
