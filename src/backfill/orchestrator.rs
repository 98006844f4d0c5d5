//! The backfill loop
//!
//! `Idle → Fetching → Embedding → Writing → Checkpointing → Fetching …`, with
//! `Draining` entered once a stop is requested and `Stopped` at the end. One
//! batch is in flight at a time; only the embedding calls within a batch run
//! concurrently.

use super::checkpoint::CheckpointStore;
use super::reconcile::{write_batch, BulkWriter, VectorUpdate};
use super::report::BackfillReport;
use crate::config::{BackfillConfig, EmbeddingConfig};
use crate::corpus::{CorpusEntity, EntityId, EntityKind};
use crate::cursor::BatchCursor;
use crate::embedding::{embed_all, EmbeddingGateway, EmbeddingJob};
use crate::error::{LaanaError, Result};
use crate::vector::{EmbeddingPrefix, ModelTier, VectorField};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Cooperative stop flag, checked between batches and between embedding and writing
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Fetching,
    Embedding,
    Writing,
    Checkpointing,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub field: VectorField,
    pub concurrency: usize,
    pub embed_timeout: Duration,
    /// Most entities to embed in this run
    pub limit: Option<usize>,
    pub error_detail_limit: usize,
}

impl BackfillSettings {
    pub fn new(field: VectorField) -> Self {
        Self {
            field,
            concurrency: 8,
            embed_timeout: Duration::from_secs(300),
            limit: None,
            error_detail_limit: 10,
        }
    }

    pub fn from_config(backfill: &BackfillConfig, embedding: &EmbeddingConfig) -> Result<Self> {
        let entity = EntityKind::parse(&backfill.target).ok_or_else(|| LaanaError::InvalidConfigValue {
            path: "backfill.target".to_string(),
            message: format!("unknown target '{}'", backfill.target),
        })?;
        let tier = ModelTier::parse(&backfill.tier).ok_or_else(|| LaanaError::InvalidConfigValue {
            path: "backfill.tier".to_string(),
            message: format!("unknown tier '{}'", backfill.tier),
        })?;
        Ok(Self {
            field: VectorField::new(entity, tier),
            concurrency: backfill.concurrency,
            embed_timeout: Duration::from_secs(embedding.timeout_secs),
            limit: None,
            error_detail_limit: backfill.error_detail_limit,
        })
    }
}

pub struct BackfillOrchestrator {
    gateway: Arc<dyn EmbeddingGateway>,
    writer: Arc<dyn BulkWriter>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    settings: BackfillSettings,
    stop: StopHandle,
    state: RunState,
}

impl BackfillOrchestrator {
    pub fn new(
        gateway: Arc<dyn EmbeddingGateway>,
        writer: Arc<dyn BulkWriter>,
        settings: BackfillSettings,
    ) -> Self {
        Self {
            gateway,
            writer,
            checkpoints: None,
            settings,
            stop: StopHandle::new(),
            state: RunState::Idle,
        }
    }

    /// Persist the watermark after every batch
    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn checkpoint_key(&self) -> String {
        self.settings.field.key()
    }

    /// Watermark a keyset cursor should resume from
    pub fn resume_point(&self) -> Result<Option<EntityId>> {
        match &self.checkpoints {
            Some(store) => store.load(&self.checkpoint_key()),
            None => Ok(None),
        }
    }

    /// Drive the cursor to exhaustion, a stop request or a fatal error
    ///
    /// The cursor is released on every path. Fatal errors (cursor expiry,
    /// fetch transport failure) end the run with `BackfillAborted`, which
    /// carries the report so far; per-entity failures never end it.
    pub async fn run(&mut self, cursor: &mut dyn BatchCursor) -> Result<BackfillReport> {
        let started = Instant::now();
        let mut report = BackfillReport::new(self.settings.field.key(), self.settings.error_detail_limit);
        info!("Backfill {} started for {}", report.run_id, report.target);

        let outcome = self.drive(cursor, &mut report).await;

        if let Err(e) = cursor.release().await {
            warn!("Cursor release failed: {}", e);
        }
        self.state = RunState::Stopped;
        report.final_state = RunState::Stopped;
        report.total_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                info!(
                    "Backfill {} finished: {} processed, {} errors, {} skipped, {} unresolved in {}ms",
                    report.run_id,
                    report.processed,
                    report.errors,
                    report.skipped,
                    report.unresolved,
                    report.total_ms
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    "Backfill {} aborted after {} batches: {}",
                    report.run_id, report.batches, e
                );
                report.aborted = Some(e.to_string());
                Err(LaanaError::BackfillAborted {
                    report: Box::new(report),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn drive(&mut self, cursor: &mut dyn BatchCursor, report: &mut BackfillReport) -> Result<()> {
        let mut budget = self.settings.limit;
        let mut exhausted = false;

        loop {
            if self.stop.is_stop_requested() {
                self.state = RunState::Draining;
                report.stopped_early = true;
                info!("Stop requested; no further batches");
                break;
            }
            if budget == Some(0) {
                info!("Limit of {:?} entities reached", self.settings.limit);
                break;
            }

            self.state = RunState::Fetching;
            let batch = match cursor.next_batch().await? {
                Some(batch) => batch,
                None => {
                    exhausted = true;
                    break;
                }
            };
            report.batches += 1;
            report.fetched += batch.len();

            let (jobs, cut_at) = self.eligible(batch, &mut budget, report);
            self.process(jobs, report).await;

            if self.state != RunState::Draining {
                self.state = RunState::Checkpointing;
            }
            // A batch cut short by the limit is only checkpointed up to its last handled entity
            if let Some(watermark) = cursor.position().watermark().map(|w| cut_at.unwrap_or(w)) {
                report.last_watermark = Some(watermark);
                if let Some(store) = &self.checkpoints {
                    store.save(&self.checkpoint_key(), watermark)?;
                    debug!("Checkpoint {} at {}", self.checkpoint_key(), watermark);
                }
            }

            if self.stop.is_stop_requested() {
                self.state = RunState::Draining;
                report.stopped_early = true;
                info!("Drained in-flight batch after stop request");
                break;
            }
        }

        if exhausted {
            if let Some(store) = &self.checkpoints {
                store.clear(&self.checkpoint_key())?;
            }
        }
        Ok(())
    }

    /// Drop blank texts and anything past the limit; the rest become jobs
    ///
    /// Also returns the last handled id when the limit left part of the batch unresolved.
    fn eligible(
        &self,
        batch: Vec<CorpusEntity>,
        budget: &mut Option<usize>,
        report: &mut BackfillReport,
    ) -> (Vec<EmbeddingJob>, Option<EntityId>) {
        let mut jobs = Vec::with_capacity(batch.len());
        let mut last_handled = None;
        let mut cut = false;
        for entity in batch {
            if *budget == Some(0) && !entity.is_blank() {
                report.unresolved += 1;
                cut = true;
                continue;
            }
            if cut {
                report.unresolved += 1;
                continue;
            }
            last_handled = Some(entity.id);
            if entity.is_blank() {
                debug!("Skipping {} {}: blank text", self.settings.field.entity, entity.id);
                report.skipped += 1;
                continue;
            }
            if let Some(n) = budget {
                *n -= 1;
            }
            jobs.push(EmbeddingJob {
                entity_id: entity.id,
                text: entity.text,
                prefix: EmbeddingPrefix::Passage,
                tier: self.settings.field.tier,
            });
        }
        (jobs, if cut { last_handled } else { None })
    }

    async fn process(&mut self, jobs: Vec<EmbeddingJob>, report: &mut BackfillReport) {
        if jobs.is_empty() {
            return;
        }

        self.state = RunState::Embedding;
        let embed_started = Instant::now();
        let settlements = embed_all(
            self.gateway.as_ref(),
            jobs,
            self.settings.concurrency,
            self.settings.embed_timeout,
        )
        .await;
        report.embed_ms += embed_started.elapsed().as_millis() as u64;

        // In-flight calls have settled; finish this batch, then stop
        if self.stop.is_stop_requested() {
            self.state = RunState::Draining;
        }

        let tier = self.settings.field.tier;
        let mut updates = Vec::with_capacity(settlements.len());
        for settlement in settlements {
            let id = settlement.entity_id;
            match settlement.outcome {
                Ok(vector) => match VectorUpdate::new(id, vector, tier) {
                    Ok(update) => updates.push(update),
                    Err(e) => {
                        warn!("Entity {} excluded: {}", id, e);
                        report.record_error(id, e.to_string());
                    }
                },
                Err(e) => {
                    warn!("Entity {} not embedded: {}", id, e);
                    report.record_error(id, format!("embedding failed: {}", e));
                }
            }
        }
        report.embedded += updates.len();

        if self.state != RunState::Draining {
            self.state = RunState::Writing;
        }
        let write_started = Instant::now();
        let write = write_batch(self.writer.as_ref(), self.settings.field, &updates).await;
        report.write_ms += write_started.elapsed().as_millis() as u64;

        report.processed += write.written.len();
        for (id, reason) in write.failed {
            warn!("Entity {} not written: {}", id, reason);
            report.record_error(id, reason);
        }
        info!(
            "Batch {}: {} embedded, {} written{}",
            report.batches,
            updates.len(),
            write.written.len(),
            if write.rolled_back { ", rolled back" } else { "" }
        );
    }
}
