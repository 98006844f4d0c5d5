//! Search modes, granularity and per-request options

use crate::corpus::EntityKind;
use crate::error::{LaanaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of search modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Exact,
    Any,
    All,
    Near,
    Regex,
    Term,
    Phrase,
    Match,
    Vector,
    Hybrid,
    Knn,
}

impl SearchMode {
    pub const ALL: [SearchMode; 11] = [
        SearchMode::Exact,
        SearchMode::Any,
        SearchMode::All,
        SearchMode::Near,
        SearchMode::Regex,
        SearchMode::Term,
        SearchMode::Phrase,
        SearchMode::Match,
        SearchMode::Vector,
        SearchMode::Hybrid,
        SearchMode::Knn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Exact => "exact",
            SearchMode::Any => "any",
            SearchMode::All => "all",
            SearchMode::Near => "near",
            SearchMode::Regex => "regex",
            SearchMode::Term => "term",
            SearchMode::Phrase => "phrase",
            SearchMode::Match => "match",
            SearchMode::Vector => "vector",
            SearchMode::Hybrid => "hybrid",
            SearchMode::Knn => "knn",
        }
    }

    /// Modes that need a query embedding
    pub fn needs_vector(&self) -> bool {
        matches!(self, SearchMode::Vector | SearchMode::Hybrid | SearchMode::Knn)
    }

    /// Modes whose result count can be computed by the store
    pub fn has_exact_count(&self) -> bool {
        !self.needs_vector()
    }

    fn from_base(name: &str) -> Option<Self> {
        let mode = match name {
            "exact" => SearchMode::Exact,
            "any" => SearchMode::Any,
            "all" => SearchMode::All,
            "near" => SearchMode::Near,
            "regex" | "regexp" => SearchMode::Regex,
            "term" => SearchMode::Term,
            "phrase" => SearchMode::Phrase,
            "match" => SearchMode::Match,
            "vector" => SearchMode::Vector,
            "hybrid" => SearchMode::Hybrid,
            "knn" => SearchMode::Knn,
            _ => return None,
        };
        Some(mode)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a search returns documents or individual sentences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Document,
    Sentence,
}

impl Granularity {
    pub fn entity(&self) -> EntityKind {
        match self {
            Granularity::Document => EntityKind::Document,
            Granularity::Sentence => EntityKind::Sentence,
        }
    }
}

/// A mode paired with its granularity, e.g. `phrasesentence`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModeSpec {
    pub mode: SearchMode,
    pub granularity: Granularity,
}

impl ModeSpec {
    pub fn new(mode: SearchMode, granularity: Granularity) -> Self {
        Self { mode, granularity }
    }

    /// Parse a mode name or one of its granular aliases
    ///
    /// Accepts the canonical names, `<mode>sentence` for sentence scope
    /// (lexical-only modes included), `regexp`, `matchsentence_all` and
    /// `hybriddoc`.
    pub fn parse(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        let unsupported = || LaanaError::UnsupportedMode {
            mode: name.to_string(),
        };

        if normalized == "matchsentence_all" {
            return Ok(Self::new(SearchMode::All, Granularity::Sentence));
        }

        let (base, granularity) = match normalized.strip_suffix("sentence") {
            Some(base) if !base.is_empty() => (base, Granularity::Sentence),
            _ => match normalized.strip_suffix("doc") {
                Some(base) if !base.is_empty() => (base, Granularity::Document),
                _ => (normalized.as_str(), Granularity::Document),
            },
        };

        let mode = SearchMode::from_base(base).ok_or_else(unsupported)?;
        Ok(Self::new(mode, granularity))
    }

    pub fn with_granularity(self, granularity: Granularity) -> Self {
        Self { granularity, ..self }
    }
}

impl FromStr for ModeSpec {
    type Err = LaanaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ModeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Document => write!(f, "{}", self.mode),
            Granularity::Sentence => write!(f, "{}sentence", self.mode),
        }
    }
}

/// Metadata filters applied on top of the mode's query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// Earliest year, inclusive
    pub date_from: Option<i32>,
    /// Latest year, inclusive
    pub date_to: Option<i32>,
    pub group_name: Option<String>,
    pub source_name: Option<String>,
    pub authors: Option<String>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.date_from.is_none()
            && self.date_to.is_none()
            && self.group_name.is_none()
            && self.source_name.is_none()
            && self.authors.is_none()
    }
}

/// Field a caller may sort by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Date,
    Authors,
    SourceName,
    GroupName,
    Length,
    Text,
}

impl SortField {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "date" => Some(SortField::Date),
            "authors" => Some(SortField::Authors),
            "source_name" | "sourcename" => Some(SortField::SourceName),
            "group_name" | "groupname" => Some(SortField::GroupName),
            "length" => Some(SortField::Length),
            "text" => Some(SortField::Text),
            _ => None,
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Ordering {
    /// Blended relevance with quality and id tie-breaks
    #[default]
    Relevance,
    /// Shuffled; reproducible when a seed is given
    Random { seed: Option<u64> },
    Field { field: SortField, descending: bool },
}

/// Options accompanying a search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Page size
    pub k: usize,
    pub offset: usize,
    pub highlight: bool,
    #[serde(default)]
    pub filters: Filters,
    /// Pre-computed query vector; skips query-time embedding
    #[serde(default, skip_serializing)]
    pub vector: Option<Vec<f32>>,
    pub diacritic_sensitive: bool,
    #[serde(default)]
    pub ordering: Ordering,
    /// Overrides the configured `near` window
    #[serde(default)]
    pub near_window: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 10,
            offset: 0,
            highlight: false,
            filters: Filters::default(),
            vector: None,
            diacritic_sensitive: true,
            ordering: Ordering::Relevance,
            near_window: None,
        }
    }
}
