/// Embedding gateway trait and its failure taxonomy
use crate::vector::{EmbeddingPrefix, ModelTier};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("Embedding request timed out")]
    Timeout,

    #[error("Bad response from embedding service: {0}")]
    BadResponse(String),

    #[error("Embedding service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<EmbeddingError> for crate::error::LaanaError {
    fn from(e: EmbeddingError) -> Self {
        crate::error::LaanaError::EmbeddingUnavailable(e.to_string())
    }
}

/// Trait for embedding backends
///
/// Implementations must be shareable across the concurrent jobs of one batch.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Embed a single text with the given prefix using the tier's model
    async fn embed(
        &self,
        text: &str,
        prefix: EmbeddingPrefix,
        tier: ModelTier,
    ) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts; one outcome per input, in input order
    ///
    /// Default implementation calls `embed` for each text sequentially.
    async fn embed_batch(
        &self,
        texts: &[String],
        prefix: EmbeddingPrefix,
        tier: ModelTier,
    ) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let mut outcomes = Vec::with_capacity(texts.len());
        for text in texts {
            outcomes.push(self.embed(text, prefix, tier).await);
        }
        outcomes
    }

    /// Gateway name for diagnostics
    fn name(&self) -> &str;
}
