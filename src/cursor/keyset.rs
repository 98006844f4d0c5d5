use super::{BatchCursor, CursorPosition};
use crate::corpus::{CorpusEntity, EntityId, EntityKind};
use crate::error::{LaanaError, Result};
use crate::vector::VectorField;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// A store that can list entities lacking a vector field in id order
#[async_trait]
pub trait KeysetSource: Send + Sync {
    /// Up to `limit` entities missing `field` with id greater than `after`, ascending by id
    async fn fetch_missing_after(
        &self,
        field: VectorField,
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<CorpusEntity>>;

    async fn fetch_by_id(&self, entity: EntityKind, id: EntityId) -> Result<Option<CorpusEntity>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Open,
    /// The last page was short; the next poll ends the stream without a fetch
    Draining,
    /// End-of-stream was reported
    Done,
}

/// Keyset pagination over entities missing a vector field
///
/// The watermark only moves forward. Entities inserted behind it during a
/// traversal are not seen until the next run.
pub struct KeysetCursor {
    source: Arc<dyn KeysetSource>,
    field: VectorField,
    batch_size: usize,
    watermark: Option<EntityId>,
    stream: Stream,
}

impl KeysetCursor {
    pub fn new(source: Arc<dyn KeysetSource>, field: VectorField, batch_size: usize) -> Self {
        Self {
            source,
            field,
            batch_size: batch_size.max(1),
            watermark: None,
            stream: Stream::Open,
        }
    }

    /// Continue after a checkpointed watermark
    pub fn resume(mut self, watermark: Option<EntityId>) -> Self {
        self.watermark = watermark;
        self
    }

    fn finish(&mut self) -> Option<Vec<CorpusEntity>> {
        self.stream = Stream::Done;
        None
    }
}

#[async_trait]
impl BatchCursor for KeysetCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<CorpusEntity>>> {
        match self.stream {
            Stream::Done => return Err(LaanaError::CursorExhausted),
            Stream::Draining => return Ok(self.finish()),
            Stream::Open => {}
        }

        let fetched = self
            .source
            .fetch_missing_after(self.field, self.watermark, self.batch_size)
            .await?;
        let fetched_len = fetched.len();

        let mut batch: Vec<CorpusEntity> = match self.watermark {
            Some(mark) => fetched.into_iter().filter(|e| e.id > mark).collect(),
            None => fetched,
        };
        if batch.len() < fetched_len {
            warn!(
                "Store returned {} entities at or below watermark {:?}; ignored",
                fetched_len - batch.len(),
                self.watermark
            );
        }
        if batch.is_empty() {
            return Ok(self.finish());
        }

        batch.sort_by_key(|e| e.id);
        self.watermark = batch.last().map(|e| e.id);
        if fetched_len < self.batch_size {
            self.stream = Stream::Draining;
        }
        debug!(
            "Keyset batch of {} for {}, watermark now {:?}",
            batch.len(),
            self.field.key(),
            self.watermark
        );
        Ok(Some(batch))
    }

    async fn release(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> CursorPosition {
        match self.watermark {
            Some(id) => CursorPosition::Watermark(id),
            None => CursorPosition::Start,
        }
    }
}

/// Yields one explicitly named entity, whether or not it already has a vector
pub struct SingleTargetCursor {
    source: Arc<dyn KeysetSource>,
    entity: EntityKind,
    id: EntityId,
    stream: Stream,
}

impl SingleTargetCursor {
    pub fn new(source: Arc<dyn KeysetSource>, entity: EntityKind, id: EntityId) -> Self {
        Self {
            source,
            entity,
            id,
            stream: Stream::Open,
        }
    }
}

#[async_trait]
impl BatchCursor for SingleTargetCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<CorpusEntity>>> {
        match self.stream {
            Stream::Done => Err(LaanaError::CursorExhausted),
            Stream::Draining => {
                self.stream = Stream::Done;
                Ok(None)
            }
            Stream::Open => match self.source.fetch_by_id(self.entity, self.id).await? {
                Some(entity) => {
                    self.stream = Stream::Draining;
                    Ok(Some(vec![entity]))
                }
                None => {
                    warn!("{} {} not found", self.entity, self.id);
                    self.stream = Stream::Done;
                    Ok(None)
                }
            },
        }
    }

    async fn release(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> CursorPosition {
        match self.stream {
            Stream::Open => CursorPosition::Start,
            _ => CursorPosition::Watermark(self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::ModelTier;
    use std::sync::Mutex;

    struct Ids {
        ids: Vec<EntityId>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl KeysetSource for Ids {
        async fn fetch_missing_after(
            &self,
            _field: VectorField,
            after: Option<EntityId>,
            limit: usize,
        ) -> Result<Vec<CorpusEntity>> {
            *self.calls.lock().unwrap() += 1;
            Ok(self
                .ids
                .iter()
                .filter(|id| after.map_or(true, |a| **id > a))
                .take(limit)
                .map(|id| CorpusEntity::new(*id, format!("text {}", id)))
                .collect())
        }

        async fn fetch_by_id(&self, _entity: EntityKind, id: EntityId) -> Result<Option<CorpusEntity>> {
            Ok(self.ids.contains(&id).then(|| CorpusEntity::new(id, "one")))
        }
    }

    fn source(ids: Vec<EntityId>) -> Arc<Ids> {
        Arc::new(Ids {
            ids,
            calls: Mutex::new(0),
        })
    }

    fn field() -> VectorField {
        VectorField::new(EntityKind::Document, ModelTier::Large)
    }

    #[tokio::test]
    async fn test_walks_in_batches_then_ends_once() {
        let src = source((1..=7).collect());
        let mut cursor = KeysetCursor::new(src.clone(), field(), 3);

        let mut seen = Vec::new();
        while let Some(batch) = cursor.next_batch().await.unwrap() {
            seen.extend(batch.into_iter().map(|e| e.id));
        }
        assert_eq!(seen, (1..=7).collect::<Vec<_>>());
        assert_eq!(cursor.position(), CursorPosition::Watermark(7));
        // Short last page ends the stream without another fetch
        assert_eq!(*src.calls.lock().unwrap(), 3);

        assert!(matches!(cursor.next_batch().await, Err(LaanaError::CursorExhausted)));
    }

    #[tokio::test]
    async fn test_resume_skips_checkpointed_ids() {
        let mut cursor = KeysetCursor::new(source(vec![2, 4, 6, 8]), field(), 10).resume(Some(4));
        let batch = cursor.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![6, 8]);
        assert!(cursor.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_corpus() {
        let mut cursor = KeysetCursor::new(source(Vec::new()), field(), 10);
        assert!(cursor.next_batch().await.unwrap().is_none());
        assert_eq!(cursor.position(), CursorPosition::Start);
    }

    #[tokio::test]
    async fn test_single_target() {
        let mut cursor = SingleTargetCursor::new(source(vec![5]), EntityKind::Sentence, 5);
        assert_eq!(cursor.next_batch().await.unwrap().unwrap().len(), 1);
        assert!(cursor.next_batch().await.unwrap().is_none());
        assert!(cursor.next_batch().await.is_err());

        let mut missing = SingleTargetCursor::new(source(vec![5]), EntityKind::Sentence, 6);
        assert!(missing.next_batch().await.unwrap().is_none());
    }
}
