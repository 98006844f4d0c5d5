use super::orchestrator::RunState;
use crate::corpus::EntityId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub entity_id: EntityId,
    pub reason: String,
}

/// Totals of one backfill run
///
/// Every fetched entity lands in exactly one of `skipped`, `errors`,
/// `processed` or `unresolved`.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub run_id: Uuid,
    /// Vector field being filled
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub batches: usize,
    pub fetched: usize,
    /// Blank text, never embedded
    pub skipped: usize,
    /// Vectors obtained and validated
    pub embedded: usize,
    /// Vectors written and confirmed
    pub processed: usize,
    pub errors: usize,
    /// Fetched but left untouched, e.g. past the run's limit
    pub unresolved: usize,
    /// The first few failures
    pub error_details: Vec<ErrorDetail>,
    pub embed_ms: u64,
    pub write_ms: u64,
    pub total_ms: u64,
    pub last_watermark: Option<EntityId>,
    pub stopped_early: bool,
    /// Set when a fatal error ended the run
    pub aborted: Option<String>,
    pub final_state: RunState,
    #[serde(skip)]
    detail_limit: usize,
}

impl BackfillReport {
    pub fn new(target: impl Into<String>, detail_limit: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target: target.into(),
            started_at: Utc::now(),
            batches: 0,
            fetched: 0,
            skipped: 0,
            embedded: 0,
            processed: 0,
            errors: 0,
            unresolved: 0,
            error_details: Vec::new(),
            embed_ms: 0,
            write_ms: 0,
            total_ms: 0,
            last_watermark: None,
            stopped_early: false,
            aborted: None,
            final_state: RunState::Idle,
            detail_limit,
        }
    }

    pub fn record_error(&mut self, entity_id: EntityId, reason: impl Into<String>) {
        self.errors += 1;
        if self.error_details.len() < self.detail_limit {
            self.error_details.push(ErrorDetail {
                entity_id,
                reason: reason.into(),
            });
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.skipped + self.errors + self.processed + self.unresolved == self.fetched
    }
}
