/// Deterministic gateway for tests and offline runs
use super::{EmbeddingError, EmbeddingGateway};
use crate::vector::{EmbeddingPrefix, ModelTier};
use ahash::AHashMap;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Produces hash-derived unit vectors of the tier's dimension
///
/// The same (text, prefix, tier) always yields the same vector. Texts
/// containing a configured marker can be made to fail, return a vector of
/// the wrong length, or respond slowly.
#[derive(Default)]
pub struct DeterministicGateway {
    fail_markers: Vec<String>,
    short_markers: Vec<String>,
    delays: Vec<(String, Duration)>,
    fixed: AHashMap<String, Vec<f32>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl DeterministicGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `ServiceUnavailable` for texts containing `marker`
    pub fn fail_on(mut self, marker: &str) -> Self {
        self.fail_markers.push(marker.to_string());
        self
    }

    /// Return a vector one element short for texts containing `marker`
    pub fn wrong_dimension_on(mut self, marker: &str) -> Self {
        self.short_markers.push(marker.to_string());
        self
    }

    /// Sleep before answering texts containing `marker`
    pub fn delay_on(mut self, marker: &str, delay: Duration) -> Self {
        self.delays.push((marker.to_string(), delay));
        self
    }

    /// Answer `text` with exactly `vector`, whatever the tier
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.to_string(), vector);
        self
    }

    /// Number of `embed` calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `embed` calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// The vector this gateway produces for a text
    pub fn vector_for(text: &str, prefix: EmbeddingPrefix, tier: ModelTier) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        prefix.as_str().hash(&mut hasher);
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut vector: Vec<f32> = (0..tier.dimension())
            .map(|_| {
                state = splitmix64(state);
                ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
            })
            .collect();

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingGateway for DeterministicGateway {
    async fn embed(
        &self,
        text: &str,
        prefix: EmbeddingPrefix,
        tier: ModelTier,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some((_, delay)) = self.delays.iter().find(|(m, _)| text.contains(m.as_str())) {
            tokio::time::sleep(*delay).await;
        }

        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }
        if self.fail_markers.iter().any(|m| text.contains(m.as_str())) {
            return Err(EmbeddingError::ServiceUnavailable(format!(
                "refused text containing marker: {}",
                text
            )));
        }
        if let Some(vector) = self.fixed.get(text) {
            return Ok(vector.clone());
        }

        let mut vector = Self::vector_for(text, prefix, tier);
        if self.short_markers.iter().any(|m| text.contains(m.as_str())) {
            vector.pop();
        }
        Ok(vector)
    }

    fn name(&self) -> &str {
        "deterministic"
    }
}
