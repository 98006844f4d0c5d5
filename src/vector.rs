//! Vector contract shared by search and backfill
//!
//! Fixes the dimensionality of each model tier, the prefixing convention the
//! multilingual E5 models expect, and the named vector fields an entity may carry.

use crate::corpus::EntityKind;
use crate::error::{LaanaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix for texts embedded at query time
pub const QUERY_PREFIX: &str = "query: ";

/// Prefix for texts embedded for storage
pub const PASSAGE_PREFIX: &str = "passage: ";

/// Digits after the decimal point when a vector is written as a SQL literal
pub const SQL_LITERAL_PRECISION: usize = 6;

/// Which side of retrieval a text is embedded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingPrefix {
    Query,
    Passage,
}

impl EmbeddingPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingPrefix::Query => QUERY_PREFIX,
            EmbeddingPrefix::Passage => PASSAGE_PREFIX,
        }
    }
}

/// Embedding model tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// multilingual-e5-small, 384 dimensions
    Small,
    /// multilingual-e5-large-instruct, 1024 dimensions
    Large,
}

impl ModelTier {
    pub fn dimension(&self) -> usize {
        match self {
            ModelTier::Small => 384,
            ModelTier::Large => 1024,
        }
    }

    pub fn default_model_id(&self) -> &'static str {
        match self {
            ModelTier::Small => "intfloat/multilingual-e5-small",
            ModelTier::Large => "intfloat/multilingual-e5-large-instruct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "small" | "384" => Some(ModelTier::Small),
            "large" | "1024" => Some(ModelTier::Large),
            _ => None,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::Small => write!(f, "small"),
            ModelTier::Large => write!(f, "large"),
        }
    }
}

/// Model identifiers per tier, as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRegistry {
    pub small: String,
    pub large: String,
}

impl ModelRegistry {
    pub fn model_id(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Small => &self.small,
            ModelTier::Large => &self.large,
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            small: ModelTier::Small.default_model_id().to_string(),
            large: ModelTier::Large.default_model_id().to_string(),
        }
    }
}

/// A named vector field on a document or sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorField {
    pub entity: EntityKind,
    pub tier: ModelTier,
}

impl VectorField {
    pub fn new(entity: EntityKind, tier: ModelTier) -> Self {
        Self { entity, tier }
    }

    pub fn dimension(&self) -> usize {
        self.tier.dimension()
    }

    /// Field name in the document-store mappings
    pub fn dsl_name(&self) -> &'static str {
        match (self.entity, self.tier) {
            (EntityKind::Document, ModelTier::Small) => "text_vector",
            (EntityKind::Document, ModelTier::Large) => "text_vector_1024",
            (EntityKind::Sentence, ModelTier::Small) => "vector",
            (EntityKind::Sentence, ModelTier::Large) => "vector_1024",
        }
    }

    /// Column name in relational tables
    pub fn column(&self) -> &'static str {
        match self.tier {
            ModelTier::Small => "vector_small",
            ModelTier::Large => "vector_large",
        }
    }

    /// Stable key used for checkpoints
    pub fn key(&self) -> String {
        format!("{}.{}", self.entity, self.dsl_name())
    }
}

/// Check a vector against the dimension mandated by its tier
pub fn validate(entity_id: i64, vector: &[f32], tier: ModelTier) -> Result<()> {
    let expected = tier.dimension();
    if vector.len() != expected {
        return Err(LaanaError::InvalidVector {
            entity_id,
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Serialize a vector as a fixed-precision decimal list, e.g. `[0.100000,-0.250000]`
pub fn to_sql_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector
        .iter()
        .map(|v| format!("{:.*}", SQL_LITERAL_PRECISION, v))
        .collect();
    format!("[{}]", parts.join(","))
}

/// Cosine similarity in [-1, 1]; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Little-endian f32 encoding for BLOB columns
pub fn encode_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_blob(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_dimensions() {
        assert_eq!(ModelTier::Small.dimension(), 384);
        assert_eq!(ModelTier::Large.dimension(), 1024);
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        assert!(validate(1, &vec![0.0; 384], ModelTier::Small).is_ok());
        let err = validate(9, &vec![0.0; 383], ModelTier::Small).unwrap_err();
        match err {
            LaanaError::InvalidVector {
                entity_id,
                expected,
                actual,
            } => {
                assert_eq!(entity_id, 9);
                assert_eq!(expected, 384);
                assert_eq!(actual, 383);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(validate(1, &vec![0.0; 384], ModelTier::Large).is_err());
    }

    #[test]
    fn test_sql_literal_fixed_precision() {
        assert_eq!(to_sql_literal(&[0.1, -0.25, 1.0]), "[0.100000,-0.250000,1.000000]");
        assert_eq!(to_sql_literal(&[]), "[]");
    }

    #[test]
    fn test_field_names() {
        let doc_large = VectorField::new(EntityKind::Document, ModelTier::Large);
        assert_eq!(doc_large.dsl_name(), "text_vector_1024");
        assert_eq!(doc_large.column(), "vector_large");
        let sent_small = VectorField::new(EntityKind::Sentence, ModelTier::Small);
        assert_eq!(sent_small.dsl_name(), "vector");
        assert_eq!(sent_small.key(), "sentence.vector");
    }

    #[test]
    fn test_blob_codec_preserves_values() {
        let v = vec![0.5, -1.25, 3.0];
        assert_eq!(decode_blob(&encode_blob(&v)), v);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
