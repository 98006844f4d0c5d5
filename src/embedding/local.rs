/// In-process multilingual E5 models via FastEmbed
use super::{EmbeddingError, EmbeddingGateway};
use crate::vector::{EmbeddingPrefix, ModelTier};
use ahash::AHashMap;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;

/// Local embedding gateway
///
/// **Important**: Models are downloaded on first use to the FastEmbed cache.
/// - multilingual-e5-small: ~470MB (384 dims)
/// - multilingual-e5-large: ~2.2GB (1024 dims)
pub struct LocalEmbeddingGateway {
    models: AHashMap<ModelTier, Arc<TextEmbedding>>,
}

impl LocalEmbeddingGateway {
    /// Load the models for the given tiers
    pub fn new(tiers: &[ModelTier]) -> Result<Self, EmbeddingError> {
        let mut models = AHashMap::new();
        for &tier in tiers {
            if models.contains_key(&tier) {
                continue;
            }
            let model = match tier {
                ModelTier::Small => EmbeddingModel::MultilingualE5Small,
                ModelTier::Large => EmbeddingModel::MultilingualE5Large,
            };

            tracing::info!(
                "Initializing local embedding model: {} ({}D)",
                tier.default_model_id(),
                tier.dimension()
            );

            let init_options = InitOptions::new(model).with_show_download_progress(true);
            let embedding = TextEmbedding::try_new(init_options)
                .map_err(|e| EmbeddingError::ServiceUnavailable(e.to_string()))?;
            models.insert(tier, Arc::new(embedding));
        }

        Ok(Self { models })
    }

    fn model(&self, tier: ModelTier) -> Result<Arc<TextEmbedding>, EmbeddingError> {
        self.models
            .get(&tier)
            .cloned()
            .ok_or_else(|| EmbeddingError::ServiceUnavailable(format!("{} model not loaded", tier)))
    }

    async fn run(
        &self,
        inputs: Vec<String>,
        tier: ModelTier,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model(tier)?;
        // ONNX inference is CPU-bound
        tokio::task::spawn_blocking(move || model.embed(inputs, None))
            .await
            .map_err(|e| EmbeddingError::ServiceUnavailable(e.to_string()))?
            .map_err(|e| EmbeddingError::BadResponse(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingGateway for LocalEmbeddingGateway {
    async fn embed(
        &self,
        text: &str,
        prefix: EmbeddingPrefix,
        tier: ModelTier,
    ) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let input = format!("{}{}", prefix.as_str(), text);
        self.run(vec![input], tier)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::BadResponse("No embeddings generated".to_string()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        prefix: EmbeddingPrefix,
        tier: ModelTier,
    ) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| format!("{}{}", prefix.as_str(), t))
            .collect();

        match self.run(inputs, tier).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors.into_iter().map(Ok).collect(),
            Ok(vectors) => {
                let err = EmbeddingError::BadResponse(format!(
                    "{} embeddings for {} inputs",
                    vectors.len(),
                    texts.len()
                ));
                vec![Err(err); texts.len()]
            }
            Err(e) => vec![Err(e); texts.len()],
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}
