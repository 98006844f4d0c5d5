//! Search execution and hybrid ranking
//!
//! Queries are built and rendered by `crate::query`; this module runs them
//! against a `SearchExecutor`, fuses split hybrid results in process and
//! reports counts.

mod ranker;
mod service;

pub use ranker::{order_by_relevance, quality_index, HybridRanker, RankWeights};
pub use service::{SearchResponse, SearchService};

use crate::corpus::{DocumentMeta, EntityId};
use crate::error::Result;
use crate::query::{Backend, RenderedQuery};
use ahash::AHashMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};

/// One hit as returned by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    pub id: EntityId,
    pub score: f32,
    pub text: String,
    pub quality_ratio: Option<f32>,
    /// Owning document, for sentence hits
    #[serde(default)]
    pub source_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<String>>,
    #[serde(default)]
    pub meta: DocumentMeta,
}

impl RawHit {
    pub fn new(id: EntityId, score: f32, text: impl Into<String>) -> Self {
        Self {
            id,
            score,
            text: text.into(),
            quality_ratio: None,
            source_id: None,
            highlights: None,
            meta: DocumentMeta::default(),
        }
    }

    pub fn with_quality(mut self, ratio: f32) -> Self {
        self.quality_ratio = Some(ratio);
        self
    }
}

/// A page of hits and, where the store reports one, the total match count
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitPage {
    pub hits: Vec<RawHit>,
    pub total: Option<u64>,
}

/// Runs rendered queries against one store
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    fn backend(&self) -> Backend;

    async fn execute(&self, query: &RenderedQuery) -> Result<HitPage>;

    async fn count(&self, query: &RenderedQuery) -> Result<u64>;

    /// Metadata of the given documents, for display alongside sentence hits
    async fn document_metadata(&self, ids: &[EntityId]) -> Result<AHashMap<EntityId, DocumentMeta>>;
}

/// Result count; vector-scored modes have no meaningful count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCount {
    Exact(u64),
    Unknown,
}

impl ResultCount {
    /// Wire encoding: the count, or -1 when unknown
    pub fn as_i64(&self) -> i64 {
        match self {
            ResultCount::Exact(n) => i64::try_from(*n).unwrap_or(i64::MAX),
            ResultCount::Unknown => -1,
        }
    }
}

impl Serialize for ResultCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl std::fmt::Display for ResultCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCount::Exact(n) => write!(f, "{}", n),
            ResultCount::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_count_is_not_zero() {
        assert_ne!(ResultCount::Unknown, ResultCount::Exact(0));
        assert_eq!(serde_json::to_string(&ResultCount::Unknown).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&ResultCount::Exact(0)).unwrap(), "0");
    }
}
