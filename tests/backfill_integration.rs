//! Backfill runs against the local corpus

mod common;

use async_trait::async_trait;
use common::{numbered_documents, store_with, CORPUS};
use laana::backfill::{
    BackfillOrchestrator, BackfillSettings, BulkWriter, CheckpointStore, RunState, StopHandle, Submission,
    VectorUpdate,
};
use laana::corpus::{CorpusEntity, EntityId, EntityKind};
use laana::cursor::{BatchCursor, CursorPosition, KeysetCursor, KeysetSource, LeasedCursor, ScrollPage, ScrollSource};
use laana::embedding::DeterministicGateway;
use laana::error::{LaanaError, Result};
use laana::storage::{LocalStore, SqliteCorpus};
use laana::vector::{ModelTier, VectorField};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn small_documents() -> VectorField {
    VectorField::new(EntityKind::Document, ModelTier::Small)
}

fn lines(docs: &[String]) -> Vec<&str> {
    docs.iter().map(String::as_str).collect()
}

fn orchestrator(store: &LocalStore, gateway: Arc<DeterministicGateway>) -> BackfillOrchestrator {
    BackfillOrchestrator::new(gateway, store.corpus.clone(), BackfillSettings::new(small_documents()))
        .with_checkpoints(store.checkpoint_store())
}

fn missing(store: &LocalStore) -> usize {
    store.stats().unwrap().documents_missing_small
}

#[tokio::test]
async fn test_full_run_skips_blank_texts() {
    let temp = TempDir::new().unwrap();
    let store = store_with(&temp, CORPUS);
    let gateway = Arc::new(DeterministicGateway::new());

    let mut run = orchestrator(&store, gateway.clone());
    let mut cursor = KeysetCursor::new(store.corpus.clone(), small_documents(), 2);
    let report = run.run(&mut cursor).await.unwrap();

    println!("✓ Backfill report: {:?}", report);
    assert_eq!(report.fetched, 6);
    assert_eq!(report.processed, 5);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors, 0);
    assert!(report.is_balanced());
    assert_eq!(report.final_state, RunState::Stopped);
    assert_eq!(gateway.calls(), 5);

    // only the blank document is left without a vector, and nothing is checkpointed
    assert_eq!(missing(&store), 1);
    assert_eq!(store.checkpoints.load(&small_documents().key()).unwrap(), None);
    let stored = store.corpus.vector(small_documents(), 3).unwrap().unwrap();
    assert_eq!(stored.len(), 384);
}

#[tokio::test]
async fn test_wrong_dimension_is_reported_per_entity() {
    let temp = TempDir::new().unwrap();
    let store = store_with(&temp, CORPUS);
    let gateway = Arc::new(DeterministicGateway::new().wrong_dimension_on("Boston").fail_on("makuahine"));

    let mut run = orchestrator(&store, gateway);
    let mut cursor = KeysetCursor::new(store.corpus.clone(), small_documents(), 10);
    let report = run.run(&mut cursor).await.unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.errors, 2);
    assert!(report.is_balanced());
    let reasons: Vec<(EntityId, &str)> = report
        .error_details
        .iter()
        .map(|d| (d.entity_id, d.reason.as_str()))
        .collect();
    assert!(reasons.iter().any(|(id, r)| *id == 4 && r.contains("expected 384")));
    assert!(reasons.iter().any(|(id, r)| *id == 5 && r.contains("embedding failed")));
    assert!(store.corpus.vector(small_documents(), 4).unwrap().is_none());
}

/// Deletes one row between fetch and write, so the transaction sees a conflict
struct VanishingRow {
    corpus: Arc<SqliteCorpus>,
    victim: EntityId,
}

#[async_trait]
impl BulkWriter for VanishingRow {
    async fn submit(&self, field: VectorField, updates: &[VectorUpdate]) -> Result<Submission> {
        let conn = self.corpus.database().get_conn()?;
        conn.execute("DELETE FROM documents WHERE source_id = ?1", [self.victim])?;
        drop(conn);
        self.corpus.submit(field, updates).await
    }
}

#[tokio::test]
async fn test_one_conflict_fails_the_whole_transaction() {
    let temp = TempDir::new().unwrap();
    let docs = numbered_documents(10);
    let store = store_with(&temp, &lines(&docs));
    let writer = Arc::new(VanishingRow {
        corpus: store.corpus.clone(),
        victim: 7,
    });

    let mut run = BackfillOrchestrator::new(
        Arc::new(DeterministicGateway::new()),
        writer,
        BackfillSettings::new(small_documents()),
    );
    let mut cursor = KeysetCursor::new(store.corpus.clone(), small_documents(), 10);
    let report = run.run(&mut cursor).await.unwrap();

    assert_eq!(report.fetched, 10);
    assert_eq!(report.processed, 0);
    assert_eq!(report.errors, 10);
    assert!(report.is_balanced());
    // nine surviving rows, none written
    assert_eq!(missing(&store), 9);
}

/// Fails every fetch after the first `healthy` ones
struct FlakySource {
    inner: Arc<SqliteCorpus>,
    healthy: usize,
    fetches: AtomicUsize,
}

#[async_trait]
impl KeysetSource for FlakySource {
    async fn fetch_missing_after(
        &self,
        field: VectorField,
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<CorpusEntity>> {
        if self.fetches.fetch_add(1, Ordering::SeqCst) >= self.healthy {
            return Err(LaanaError::Store("connection reset".to_string()));
        }
        self.inner.fetch_missing_after(field, after, limit).await
    }

    async fn fetch_by_id(&self, entity: EntityKind, id: EntityId) -> Result<Option<CorpusEntity>> {
        self.inner.fetch_by_id(entity, id).await
    }
}

#[tokio::test]
async fn test_resume_after_crash_embeds_each_entity_once() {
    let temp = TempDir::new().unwrap();
    let docs = numbered_documents(12);
    let store = store_with(&temp, &lines(&docs));
    let gateway = Arc::new(DeterministicGateway::new());
    let key = small_documents().key();

    let flaky = Arc::new(FlakySource {
        inner: store.corpus.clone(),
        healthy: 2,
        fetches: AtomicUsize::new(0),
    });
    let mut first = orchestrator(&store, gateway.clone());
    let mut cursor = KeysetCursor::new(flaky, small_documents(), 5);
    let err = first.run(&mut cursor).await.unwrap_err();
    assert!(err.is_fatal_to_run());
    match err {
        LaanaError::BackfillAborted { report, source } => {
            assert!(matches!(*source, LaanaError::Store(_)));
            assert_eq!(report.batches, 2);
            assert_eq!(report.processed, 10);
            assert_eq!(report.last_watermark, Some(10));
            assert!(report.is_balanced());
            assert!(report.aborted.as_deref().unwrap().contains("connection reset"));
        }
        other => panic!("expected an aborted run, got {:?}", other),
    }
    assert_eq!(store.checkpoints.load(&key).unwrap(), Some(10));
    assert_eq!(missing(&store), 2);

    let mut second = orchestrator(&store, gateway.clone());
    let resume = second.resume_point().unwrap();
    let mut cursor = KeysetCursor::new(store.corpus.clone(), small_documents(), 5).resume(resume);
    let report = second.run(&mut cursor).await.unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(gateway.calls(), 12);
    assert_eq!(missing(&store), 0);
    assert_eq!(store.checkpoints.load(&key).unwrap(), None);
}

#[tokio::test]
async fn test_limit_leaves_the_rest_for_the_next_run() {
    let temp = TempDir::new().unwrap();
    let docs = numbered_documents(8);
    let store = store_with(&temp, &lines(&docs));
    let gateway = Arc::new(DeterministicGateway::new());

    let mut settings = BackfillSettings::new(small_documents());
    settings.limit = Some(3);
    let mut limited = BackfillOrchestrator::new(gateway.clone(), store.corpus.clone(), settings)
        .with_checkpoints(store.checkpoint_store());
    let mut cursor = KeysetCursor::new(store.corpus.clone(), small_documents(), 5);
    let report = limited.run(&mut cursor).await.unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.unresolved, 2);
    assert!(report.is_balanced());
    assert_eq!(report.last_watermark, Some(3));

    let mut rest = orchestrator(&store, gateway.clone());
    let mut cursor = KeysetCursor::new(store.corpus.clone(), small_documents(), 5).resume(rest.resume_point().unwrap());
    let report = rest.run(&mut cursor).await.unwrap();
    assert_eq!(report.processed, 5);
    assert_eq!(gateway.calls(), 8);
}

/// Requests a stop as soon as the first batch is handed out
struct StopAfterFirstBatch {
    inner: KeysetCursor,
    stop: StopHandle,
}

#[async_trait]
impl BatchCursor for StopAfterFirstBatch {
    async fn next_batch(&mut self) -> Result<Option<Vec<CorpusEntity>>> {
        let batch = self.inner.next_batch().await;
        self.stop.request_stop();
        batch
    }

    async fn release(&mut self) -> Result<()> {
        self.inner.release().await
    }

    fn position(&self) -> CursorPosition {
        self.inner.position()
    }
}

#[tokio::test]
async fn test_stop_drains_the_batch_in_flight() {
    let temp = TempDir::new().unwrap();
    let docs = numbered_documents(9);
    let store = store_with(&temp, &lines(&docs));
    let gateway = Arc::new(DeterministicGateway::new().delay_on("helu", Duration::from_millis(20)));

    let mut run = orchestrator(&store, gateway);
    let mut cursor = StopAfterFirstBatch {
        inner: KeysetCursor::new(store.corpus.clone(), small_documents(), 4),
        stop: run.stop_handle(),
    };
    let report = run.run(&mut cursor).await.unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.batches, 1);
    assert_eq!(report.processed, 4);
    assert_eq!(missing(&store), 5);
    assert_eq!(store.checkpoints.load(&small_documents().key()).unwrap(), Some(4));
}

/// Scroll sessions over the local corpus whose second renewal finds the session gone
struct ExpiringScroll {
    corpus: Arc<SqliteCorpus>,
    renewals: AtomicUsize,
    cleared: Mutex<Vec<String>>,
}

#[async_trait]
impl ScrollSource for ExpiringScroll {
    async fn open_scroll(&self, field: VectorField, batch_size: usize, _keep_alive: &str) -> Result<ScrollPage> {
        Ok(ScrollPage {
            scroll_id: "scroll-1".to_string(),
            entities: self.corpus.fetch_missing_after(field, None, batch_size).await?,
        })
    }

    async fn continue_scroll(&self, scroll_id: &str, _keep_alive: &str) -> Result<ScrollPage> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        Err(LaanaError::CursorExpired(format!("{} not found", scroll_id)))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.cleared.lock().unwrap().push(scroll_id.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_expired_lease_ends_the_run_and_releases_the_scroll() {
    let temp = TempDir::new().unwrap();
    let docs = numbered_documents(6);
    let store = store_with(&temp, &lines(&docs));
    let scroll = Arc::new(ExpiringScroll {
        corpus: store.corpus.clone(),
        renewals: AtomicUsize::new(0),
        cleared: Mutex::new(Vec::new()),
    });

    let mut run = orchestrator(&store, Arc::new(DeterministicGateway::new()));
    let mut cursor = LeasedCursor::new(scroll.clone(), small_documents(), 3, "1m", Duration::from_secs(5));
    let err = run.run(&mut cursor).await.unwrap_err();

    let report = match err {
        LaanaError::BackfillAborted { report, source } => {
            assert!(matches!(*source, LaanaError::CursorExpired(_)));
            report
        }
        other => panic!("expected an aborted run, got {:?}", other),
    };
    // the first page survives in the report
    assert_eq!(report.batches, 1);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.processed, 3);
    assert!(report.is_balanced());
    assert_eq!(report.last_watermark, None);
    assert_eq!(report.final_state, RunState::Stopped);
    assert_eq!(scroll.renewals.load(Ordering::SeqCst), 1);
    assert_eq!(*scroll.cleared.lock().unwrap(), vec!["scroll-1".to_string()]);
    // the first page was written before the lease was lost; leases never checkpoint
    assert_eq!(missing(&store), 3);
    assert_eq!(store.checkpoints.load(&small_documents().key()).unwrap(), None);
    assert_eq!(run.state(), RunState::Stopped);
}
