//! Backend-neutral query representation

use super::highlight::HighlightDirective;
use super::mode::{Filters, ModeSpec, Ordering};
use crate::vector::VectorField;
use serde::Serialize;

/// Which text field a clause targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextField {
    /// Analyzed text
    Text,
    /// Unanalyzed text, for regex and term lookups
    Raw,
    /// Diacritic-folded text
    Folded,
}

impl TextField {
    pub fn is_folded(&self) -> bool {
        matches!(self, TextField::Folded)
    }
}

/// Structural constraint a lexical query places on its terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Constraint {
    /// Contiguous, case-insensitive occurrence on word boundaries
    Exact,
    /// At least one term
    Any,
    /// Every term, any order, same field
    All,
    /// Terms in the given order, consecutive terms at most `window` positions apart
    Near { window: usize },
    /// Whole-token equality
    Term,
    /// Contiguous, order-preserving tokens
    Phrase,
    /// Relevance-scored disjunction
    Match,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalQuery {
    /// Tokenized, lowercased (and folded when the field is folded) terms
    pub terms: Vec<String>,
    /// Query text as given, folded when the field is folded
    pub raw: String,
    pub constraint: Constraint,
    pub field: TextField,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorQuery {
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub field: VectorField,
    pub k: usize,
    pub num_candidates: usize,
    /// Score every candidate instead of an approximate nearest-neighbour lookup
    pub exhaustive: bool,
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum QueryIr {
    Lexical(LexicalQuery),
    Regex {
        pattern: String,
        field: TextField,
    },
    Vector(VectorQuery),
    /// Both halves are always executed
    Hybrid {
        lexical: LexicalQuery,
        vector: VectorQuery,
    },
}

impl QueryIr {
    pub fn vector_query(&self) -> Option<&VectorQuery> {
        match self {
            QueryIr::Vector(v) | QueryIr::Hybrid { vector: v, .. } => Some(v),
            _ => None,
        }
    }

    pub fn lexical_query(&self) -> Option<&LexicalQuery> {
        match self {
            QueryIr::Lexical(l) | QueryIr::Hybrid { lexical: l, .. } => Some(l),
            _ => None,
        }
    }
}

/// Multiplicative `ln(1 + ratio)` boost on the quality field; documents
/// without a ratio count as 1
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityBoost {
    pub field: String,
    pub missing: f32,
}

impl QualityBoost {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            missing: 1.0,
        }
    }

    pub fn factor(&self, ratio: Option<f32>) -> f32 {
        ratio.unwrap_or(self.missing).max(0.0).ln_1p()
    }
}

/// A fully built search, ready to render for any backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltQuery {
    pub spec: ModeSpec,
    /// Query text as entered
    pub text: String,
    pub ir: QueryIr,
    pub highlight: Option<HighlightDirective>,
    pub filters: Filters,
    pub boost: Option<QualityBoost>,
    pub ordering: Ordering,
    pub k: usize,
    pub offset: usize,
}

impl BuiltQuery {
    /// Same query with a different IR, used to split hybrid searches
    pub fn with_ir(&self, ir: QueryIr) -> Self {
        Self {
            ir,
            ..self.clone()
        }
    }

    /// Hits to request so that `offset + k` survive the page cut
    pub fn window(&self) -> usize {
        self.offset + self.k
    }
}
