//! Corpus data model
//!
//! Documents and their constituent sentences, plus the text utilities and
//! quality signal shared by the query engine and the import path.

mod quality;
mod text;

pub use quality::QualityScorer;
pub use text::{fold_diacritics, split_sentences, tokenize, Token};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a document (`sourceId`) or sentence (`sentenceId`)
pub type EntityId = i64;

/// Granularity of a corpus entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Document,
    Sentence,
}

impl EntityKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "document" | "documents" | "doc" => Some(EntityKind::Document),
            "sentence" | "sentences" => Some(EntityKind::Sentence),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Document => write!(f, "document"),
            EntityKind::Sentence => write!(f, "sentence"),
        }
    }
}

/// A source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_id: EntityId,
    pub text: String,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    /// ISO date (`YYYY-MM-DD`) when known
    #[serde(default)]
    pub date: Option<String>,
    /// Ranking boost in [0, 1]
    #[serde(default)]
    pub quality_ratio: Option<f32>,
}

/// A sentence belonging to one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentence {
    pub sentence_id: EntityId,
    pub source_id: EntityId,
    #[serde(default)]
    pub position: i64,
    pub text: String,
    #[serde(default)]
    pub quality_ratio: Option<f32>,
}

/// Document-level metadata shown alongside sentence hits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub group_name: Option<String>,
    pub source_name: Option<String>,
    pub authors: Option<String>,
    pub date: Option<String>,
}

/// An entity as yielded by a batch cursor: identity and text only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntity {
    pub id: EntityId,
    pub text: String,
}

impl CorpusEntity {
    pub fn new(id: EntityId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }

    /// Empty or whitespace-only text is never embedded
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_detection() {
        assert!(CorpusEntity::new(1, "").is_blank());
        assert!(CorpusEntity::new(2, " \t\n").is_blank());
        assert!(!CorpusEntity::new(3, "aloha").is_blank());
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!(EntityKind::parse("Sentences"), Some(EntityKind::Sentence));
        assert_eq!(EntityKind::parse("doc"), Some(EntityKind::Document));
        assert_eq!(EntityKind::parse("page"), None);
    }
}
