//! Client for the embedding microservice
//!
//! `POST /embed` embeds one text, `POST /embed_sentences` embeds a list in
//! input order, `GET /health` reports readiness.

use super::{EmbeddingError, EmbeddingGateway};
use crate::config::EmbeddingConfig;
use crate::error::{LaanaError, Result};
use crate::vector::{EmbeddingPrefix, ModelRegistry, ModelTier};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
    prefix: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct EmbedSentencesRequest<'a> {
    sentences: &'a [String],
    prefix: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbedSentencesResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding gateway backed by the HTTP embedding service
pub struct HttpEmbeddingGateway {
    client: Client,
    base_url: String,
    models: ModelRegistry,
}

impl HttpEmbeddingGateway {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            models: config.models(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Check that the service is up
    pub async fn health(&self) -> Result<()> {
        let response = self.client.get(self.endpoint("health")).send().await?;
        if !response.status().is_success() {
            return Err(LaanaError::EmbeddingUnavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> std::result::Result<R, EmbeddingError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(map_status(status, &detail));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| EmbeddingError::BadResponse(format!("malformed body: {}", e)))
    }
}

fn map_transport_error(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Timeout
    } else {
        EmbeddingError::ServiceUnavailable(e.to_string())
    }
}

fn map_status(status: StatusCode, detail: &str) -> EmbeddingError {
    if status.is_server_error() {
        EmbeddingError::ServiceUnavailable(format!("{}: {}", status, detail))
    } else {
        EmbeddingError::BadResponse(format!("{}: {}", status, detail))
    }
}

#[async_trait]
impl EmbeddingGateway for HttpEmbeddingGateway {
    async fn embed(
        &self,
        text: &str,
        prefix: EmbeddingPrefix,
        tier: ModelTier,
    ) -> std::result::Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let request = EmbedRequest {
            text,
            prefix: prefix.as_str(),
            model: self.models.model_id(tier),
        };
        let response: EmbedResponse = self.post("embed", &request).await?;
        Ok(response.embedding)
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        prefix: EmbeddingPrefix,
        tier: ModelTier,
    ) -> Vec<std::result::Result<Vec<f32>, EmbeddingError>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let request = EmbedSentencesRequest {
            sentences: texts,
            prefix: prefix.as_str(),
            model: self.models.model_id(tier),
        };
        debug!("Embedding {} sentences with {}", texts.len(), request.model);

        match self
            .post::<_, EmbedSentencesResponse>("embed_sentences", &request)
            .await
        {
            Ok(response) if response.embeddings.len() == texts.len() => {
                response.embeddings.into_iter().map(Ok).collect()
            }
            Ok(response) => {
                let err = EmbeddingError::BadResponse(format!(
                    "{} embeddings for {} sentences",
                    response.embeddings.len(),
                    texts.len()
                ));
                vec![Err(err); texts.len()]
            }
            Err(e) => vec![Err(e); texts.len()],
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
