//! Batch cursors over the corpus
//!
//! A cursor yields batches of entities until it reports end-of-stream exactly
//! once; polling again after that is `CursorExhausted`. Cursors holding a
//! server-side resource must be released on every exit path, including errors.

mod keyset;
mod leased;

pub use keyset::{KeysetCursor, KeysetSource, SingleTargetCursor};
pub use leased::{LeasedCursor, ScrollPage, ScrollSource};

use crate::corpus::{CorpusEntity, EntityId};
use crate::error::Result;
use async_trait::async_trait;

/// Where a cursor stands, for checkpointing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorPosition {
    /// Highest id already yielded
    Watermark(EntityId),
    /// Server-held session token
    Lease(String),
    Start,
}

impl CursorPosition {
    pub fn watermark(&self) -> Option<EntityId> {
        match self {
            CursorPosition::Watermark(id) => Some(*id),
            _ => None,
        }
    }
}

#[async_trait]
pub trait BatchCursor: Send {
    /// Next batch, or `None` once at exhaustion
    async fn next_batch(&mut self) -> Result<Option<Vec<CorpusEntity>>>;

    /// Free any server-side resource; safe to call more than once
    async fn release(&mut self) -> Result<()>;

    fn position(&self) -> CursorPosition;
}
