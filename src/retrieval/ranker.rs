//! Weighted blend of lexical relevance, vector similarity and quality

use super::RawHit;
use crate::config::WeightsConfig;
use crate::corpus::EntityId;
use crate::query::Backend;
use ahash::AHashMap;
use std::cmp::Ordering;

/// Blend weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankWeights {
    pub text: f32,
    pub vector: f32,
    pub quality: f32,
}

impl RankWeights {
    /// Defaults per store family
    ///
    /// Document-store similarity comes back as `cosine + 1`, already on a
    /// wider scale than the normalised text score, so it is not weighted up.
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::DocumentStore => Self {
                text: 1.0,
                vector: 1.0,
                quality: 0.5,
            },
            Backend::Relational | Backend::Embedded => Self {
                text: 1.0,
                vector: 1.5,
                quality: 0.5,
            },
        }
    }

    pub fn with_overrides(self, overrides: Option<&WeightsConfig>) -> Self {
        match overrides {
            Some(w) => Self {
                text: w.text,
                vector: w.vector,
                quality: w.quality,
            },
            None => self,
        }
    }
}

pub struct HybridRanker {
    weights: RankWeights,
}

impl HybridRanker {
    pub fn new(weights: RankWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> RankWeights {
        self.weights
    }

    /// Fuse separately executed lexical and vector hits
    ///
    /// Lexical scores are normalised by the best lexical score; an entity
    /// missing from one list contributes zero for that signal. The result is
    /// the union by id, ordered by blended score and truncated to `limit`.
    pub fn rank(
        &self,
        lexical: Vec<RawHit>,
        vector: Vec<RawHit>,
        quality_by_id: &AHashMap<EntityId, f32>,
        limit: usize,
    ) -> Vec<RawHit> {
        let max_lexical = lexical.iter().map(|h| h.score).fold(0.0f32, f32::max);

        let mut merged: AHashMap<EntityId, (RawHit, f32, f32)> = AHashMap::new();
        for hit in lexical {
            let normalized = if max_lexical > 0.0 {
                hit.score / max_lexical
            } else {
                0.0
            };
            merged.insert(hit.id, (hit, normalized, 0.0));
        }
        for hit in vector {
            let similarity = hit.score;
            match merged.get_mut(&hit.id) {
                Some(entry) => {
                    entry.2 = similarity;
                    if entry.0.highlights.is_none() {
                        entry.0.highlights = hit.highlights;
                    }
                }
                None => {
                    merged.insert(hit.id, (hit, 0.0, similarity));
                }
            }
        }

        let mut results: Vec<RawHit> = merged
            .into_values()
            .map(|(mut hit, text, similarity)| {
                // One quality value per id feeds both the blend and the tie-break
                hit.quality_ratio = quality_by_id.get(&hit.id).copied().or(hit.quality_ratio);
                hit.score = self.weights.text * text
                    + self.weights.vector * similarity
                    + self.weights.quality * hit.quality_ratio.unwrap_or(0.0);
                hit
            })
            .collect();

        order_by_relevance(&mut results);
        results.truncate(limit);
        results
    }
}

fn compare(a: &RawHit, b: &RawHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| {
            let qa = a.quality_ratio.unwrap_or(0.0);
            let qb = b.quality_ratio.unwrap_or(0.0);
            qb.total_cmp(&qa)
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Score descending, then quality descending, then id ascending
pub fn order_by_relevance(hits: &mut [RawHit]) {
    hits.sort_by(compare);
}

/// Quality ratios carried by the hits themselves
pub fn quality_index<'a>(hits: impl IntoIterator<Item = &'a RawHit>) -> AHashMap<EntityId, f32> {
    hits.into_iter()
        .filter_map(|h| h.quality_ratio.map(|q| (h.id, q)))
        .collect()
}
