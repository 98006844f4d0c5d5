//! Bulk write submission and per-item reconciliation
//!
//! Non-transactional stores settle each item independently. Transactional
//! stores hand back a pending transaction that is committed only when every
//! submitted operation applied; otherwise the whole batch is rolled back and
//! reported as failed.

use crate::corpus::EntityId;
use crate::error::{LaanaError, Result};
use crate::vector::{self, ModelTier, VectorField};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};

/// A vector overwrite for one entity; only constructible with a valid dimension
#[derive(Debug, Clone, PartialEq)]
pub struct VectorUpdate {
    entity_id: EntityId,
    vector: Vec<f32>,
}

impl VectorUpdate {
    pub fn new(entity_id: EntityId, vector: Vec<f32>, tier: ModelTier) -> Result<Self> {
        vector::validate(entity_id, &vector, tier)?;
        Ok(Self { entity_id, vector })
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ItemOutcome {
    Applied,
    VersionConflict,
    ValidationError(String),
    TransportError(String),
}

impl ItemOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ItemOutcome::Applied)
    }

    fn describe(&self) -> String {
        match self {
            ItemOutcome::Applied => "applied".to_string(),
            ItemOutcome::VersionConflict => "version conflict".to_string(),
            ItemOutcome::ValidationError(reason) => format!("validation error: {}", reason),
            ItemOutcome::TransportError(reason) => format!("transport error: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub entity_id: EntityId,
    pub outcome: ItemOutcome,
}

impl ItemResult {
    pub fn new(entity_id: EntityId, outcome: ItemOutcome) -> Self {
        Self { entity_id, outcome }
    }
}

/// Per-operation results of one bulk request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkWriteResult {
    pub items: Vec<ItemResult>,
}

impl BulkWriteResult {
    pub fn new(items: Vec<ItemResult>) -> Self {
        Self { items }
    }

    pub fn applied(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_applied()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|i| !i.outcome.is_applied())
    }
}

/// An open transaction whose per-row results are known but not yet committed
#[async_trait]
pub trait PendingTransaction: Send {
    fn result(&self) -> &BulkWriteResult;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

pub enum Submission {
    Settled(BulkWriteResult),
    Pending(Box<dyn PendingTransaction>),
}

/// A store accepting batched vector overwrites keyed by entity id
#[async_trait]
pub trait BulkWriter: Send + Sync {
    async fn submit(&self, field: VectorField, updates: &[VectorUpdate]) -> Result<Submission>;
}

/// What a batch write amounted to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWrite {
    pub written: Vec<EntityId>,
    pub failed: Vec<(EntityId, String)>,
    pub rolled_back: bool,
}

impl BatchWrite {
    fn all_failed(updates: &[VectorUpdate], reason: &str) -> Self {
        Self {
            written: Vec::new(),
            failed: updates
                .iter()
                .map(|u| (u.entity_id, reason.to_string()))
                .collect(),
            rolled_back: false,
        }
    }
}

/// Submit one batch and classify every operation as written or failed
pub async fn write_batch(writer: &dyn BulkWriter, field: VectorField, updates: &[VectorUpdate]) -> BatchWrite {
    if updates.is_empty() {
        return BatchWrite::default();
    }

    let submission = match writer.submit(field, updates).await {
        Ok(submission) => submission,
        Err(e) => {
            error!("Bulk write of {} operations failed: {}", updates.len(), e);
            return BatchWrite::all_failed(updates, &format!("transport error: {}", e));
        }
    };

    match submission {
        Submission::Settled(result) => settle(updates, &result),
        Submission::Pending(tx) => {
            let submitted = updates.len();
            let applied = tx.result().applied();
            let complete = applied == submitted && tx.result().items.len() == submitted;

            if complete {
                match tx.commit().await {
                    Ok(()) => {
                        debug!("Committed {} vector writes", submitted);
                        BatchWrite {
                            written: updates.iter().map(|u| u.entity_id).collect(),
                            ..BatchWrite::default()
                        }
                    }
                    Err(e) => {
                        error!("Commit failed: {}", e);
                        BatchWrite::all_failed(updates, &format!("commit failed: {}", e))
                    }
                }
            } else {
                let mismatch = LaanaError::WriteMismatch { submitted, applied };
                warn!("{}; rolling back batch", mismatch);
                if let Err(e) = tx.rollback().await {
                    error!("Rollback failed: {}", e);
                }
                BatchWrite {
                    rolled_back: true,
                    ..BatchWrite::all_failed(updates, &mismatch.to_string())
                }
            }
        }
    }
}

fn settle(updates: &[VectorUpdate], result: &BulkWriteResult) -> BatchWrite {
    let mut write = BatchWrite::default();
    for update in updates {
        match result.items.iter().find(|i| i.entity_id == update.entity_id) {
            Some(item) if item.outcome.is_applied() => write.written.push(update.entity_id),
            Some(item) => write.failed.push((update.entity_id, item.outcome.describe())),
            None => write
                .failed
                .push((update.entity_id, "no result reported for operation".to_string())),
        }
    }
    write
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::EntityKind;
    use std::sync::{Arc, Mutex};

    fn field() -> VectorField {
        VectorField::new(EntityKind::Document, ModelTier::Small)
    }

    fn updates(n: i64) -> Vec<VectorUpdate> {
        (1..=n)
            .map(|id| VectorUpdate::new(id, vec![0.1; 384], ModelTier::Small).unwrap())
            .collect()
    }

    struct Tx {
        result: BulkWriteResult,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl PendingTransaction for Tx {
        fn result(&self) -> &BulkWriteResult {
            &self.result
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.log.lock().unwrap().push("commit");
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.log.lock().unwrap().push("rollback");
            Ok(())
        }
    }

    struct Writer {
        conflict_on: Option<EntityId>,
        transactional: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl BulkWriter for Writer {
        async fn submit(&self, _field: VectorField, updates: &[VectorUpdate]) -> Result<Submission> {
            let items = updates
                .iter()
                .map(|u| {
                    let outcome = if Some(u.entity_id()) == self.conflict_on {
                        ItemOutcome::VersionConflict
                    } else {
                        ItemOutcome::Applied
                    };
                    ItemResult::new(u.entity_id(), outcome)
                })
                .collect();
            let result = BulkWriteResult::new(items);
            if self.transactional {
                Ok(Submission::Pending(Box::new(Tx {
                    result,
                    log: self.log.clone(),
                })))
            } else {
                Ok(Submission::Settled(result))
            }
        }
    }

    fn writer(conflict_on: Option<EntityId>, transactional: bool) -> Writer {
        Writer {
            conflict_on,
            transactional,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[test]
    fn test_update_rejects_wrong_dimension() {
        assert!(VectorUpdate::new(1, vec![0.0; 383], ModelTier::Small).is_err());
        assert!(VectorUpdate::new(1, vec![0.0; 384], ModelTier::Large).is_err());
    }

    #[tokio::test]
    async fn test_transactional_mismatch_rolls_back_everything() {
        let w = writer(Some(7), true);
        let outcome = write_batch(&w, field(), &updates(10)).await;
        assert!(outcome.written.is_empty());
        assert_eq!(outcome.failed.len(), 10);
        assert!(outcome.rolled_back);
        assert!(outcome.failed[0].1.contains("submitted 10"));
        assert_eq!(w.log.lock().unwrap().as_slice(), ["rollback"]);
    }

    #[tokio::test]
    async fn test_transactional_success_commits() {
        let w = writer(None, true);
        let outcome = write_batch(&w, field(), &updates(10)).await;
        assert_eq!(outcome.written.len(), 10);
        assert_eq!(w.log.lock().unwrap().as_slice(), ["commit"]);
    }

    #[tokio::test]
    async fn test_settled_items_are_independent() {
        let w = writer(Some(3), false);
        let outcome = write_batch(&w, field(), &updates(4)).await;
        assert_eq!(outcome.written, vec![1, 2, 4]);
        assert_eq!(outcome.failed, vec![(3, "version conflict".to_string())]);
        assert!(!outcome.rolled_back);
    }

    #[tokio::test]
    async fn test_submit_failure_fails_every_operation() {
        struct Down;
        #[async_trait]
        impl BulkWriter for Down {
            async fn submit(&self, _f: VectorField, _u: &[VectorUpdate]) -> Result<Submission> {
                Err(LaanaError::Store("connection refused".into()))
            }
        }
        let outcome = write_batch(&Down, field(), &updates(3)).await;
        assert_eq!(outcome.failed.len(), 3);
        assert!(outcome.failed[0].1.starts_with("transport error"));
    }
}
