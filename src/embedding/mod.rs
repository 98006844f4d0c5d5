mod fanout;
/// Embedding gateway
///
/// Abstracts the external embedding service that turns text into dense vectors.
/// Architecture:
/// - EmbeddingGateway trait for abstraction
/// - HttpEmbeddingGateway for the embedding microservice (`/embed`, `/embed_sentences`)
/// - LocalEmbeddingGateway for in-process multilingual E5 models
/// - DeterministicGateway for tests and offline runs
/// - Bounded fan-out that settles every job before returning
mod gateway;
mod http;
mod local;
mod mock;

pub use fanout::{embed_all, EmbeddingJob, Settlement};
pub use gateway::{EmbeddingError, EmbeddingGateway};
pub use http::HttpEmbeddingGateway;
pub use local::LocalEmbeddingGateway;
pub use mock::DeterministicGateway;

use crate::config::EmbeddingConfig;
use crate::error::{LaanaError, Result};
use crate::vector::ModelTier;
use std::sync::Arc;

/// Build the gateway selected by configuration
pub fn gateway_from_config(
    config: &EmbeddingConfig,
    tiers: &[ModelTier],
) -> Result<Arc<dyn EmbeddingGateway>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbeddingGateway::new(config)?)),
        "local" => Ok(Arc::new(
            LocalEmbeddingGateway::new(tiers)
                .map_err(|e| LaanaError::EmbeddingUnavailable(e.to_string()))?,
        )),
        "deterministic" => Ok(Arc::new(DeterministicGateway::new())),
        other => Err(LaanaError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}
