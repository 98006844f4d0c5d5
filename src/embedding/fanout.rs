/// Bounded fan-out of embedding jobs
use super::{EmbeddingError, EmbeddingGateway};
use crate::corpus::EntityId;
use crate::vector::{EmbeddingPrefix, ModelTier};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::debug;

/// One text to embed on behalf of one entity
#[derive(Debug, Clone)]
pub struct EmbeddingJob {
    pub entity_id: EntityId,
    pub text: String,
    pub prefix: EmbeddingPrefix,
    pub tier: ModelTier,
}

/// Settled outcome of a job: a vector or the reason there is none
#[derive(Debug, Clone)]
pub struct Settlement {
    pub entity_id: EntityId,
    pub outcome: Result<Vec<f32>, EmbeddingError>,
}

/// Run every job with at most `concurrency` calls in flight and wait for all
/// of them to settle. A failed or timed-out job never cancels its siblings.
///
/// Settlements are returned in completion order, keyed by entity id.
pub async fn embed_all(
    gateway: &dyn EmbeddingGateway,
    jobs: Vec<EmbeddingJob>,
    concurrency: usize,
    timeout: Duration,
) -> Vec<Settlement> {
    let limit = concurrency.max(1);
    debug!(
        "Embedding {} jobs via {} (concurrency {})",
        jobs.len(),
        gateway.name(),
        limit
    );

    stream::iter(jobs)
        .map(|job| async move {
            let call = gateway.embed(&job.text, job.prefix, job.tier);
            let outcome = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(EmbeddingError::Timeout),
            };
            Settlement {
                entity_id: job.entity_id,
                outcome,
            }
        })
        .buffer_unordered(limit)
        .collect()
        .await
}
