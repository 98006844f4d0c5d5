//! Backend rendering of built queries
//!
//! One `Backend` variant per store family. Rendering is a pure function of
//! the built query and the settings, except for an unseeded random ordering.

mod dsl;
mod sql;

pub use dsl::DslRequest;
pub use sql::{SqlStatement, SqlValue};

use super::ir::{BuiltQuery, QueryIr};
use crate::config::SearchConfig;
use crate::error::{LaanaError, Result};
use serde::Serialize;
use std::fmt;

/// Store families a query can be rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Search engine with a JSON query DSL
    DocumentStore,
    /// SQL with full-text search and a vector extension
    Relational,
    /// The local SQLite corpus, evaluated in-process
    Embedded,
}

impl Backend {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "document_store" => Ok(Backend::DocumentStore),
            "relational" => Ok(Backend::Relational),
            "embedded" => Ok(Backend::Embedded),
            other => Err(LaanaError::Config(format!("Unknown search backend: {}", other))),
        }
    }

    /// Whether lexical and vector scores can be fused in one request
    pub fn fuses_natively(&self) -> bool {
        matches!(self, Backend::DocumentStore)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::DocumentStore => write!(f, "document_store"),
            Backend::Relational => write!(f, "relational"),
            Backend::Embedded => write!(f, "embedded"),
        }
    }
}

/// Index and table names used by renderers
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub documents_index: String,
    pub sentences_index: String,
    pub documents_table: String,
    pub sentences_table: String,
}

impl From<&SearchConfig> for RenderSettings {
    fn from(config: &SearchConfig) -> Self {
        Self {
            documents_index: config.documents_index.clone(),
            sentences_index: config.sentences_index.clone(),
            documents_table: config.documents_table.clone(),
            sentences_table: config.sentences_table.clone(),
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

/// A query in the form its backend executes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "form")]
pub enum RenderedQuery {
    Dsl(DslRequest),
    Sql(SqlStatement),
    /// Evaluated in-process by the embedded store
    Native(Box<BuiltQuery>),
    /// Two sub-queries to run separately and fuse in the ranker
    Split {
        lexical: Box<RenderedQuery>,
        vector: Box<RenderedQuery>,
    },
}

pub struct Renderer {
    backend: Backend,
    settings: RenderSettings,
}

impl Renderer {
    pub fn new(backend: Backend, settings: RenderSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn render(&self, query: &BuiltQuery) -> RenderedQuery {
        if let QueryIr::Hybrid { lexical, vector } = &query.ir {
            if !self.backend.fuses_natively() {
                // Each half fetches the full vector candidate window
                let mut lexical_part = query.with_ir(QueryIr::Lexical(lexical.clone()));
                let mut vector_part = query.with_ir(QueryIr::Vector(vector.clone()));
                for part in [&mut lexical_part, &mut vector_part] {
                    part.k = vector.k;
                    part.offset = 0;
                }
                return RenderedQuery::Split {
                    lexical: Box::new(self.render_single(&lexical_part)),
                    vector: Box::new(self.render_single(&vector_part)),
                };
            }
        }
        self.render_single(query)
    }

    fn render_single(&self, query: &BuiltQuery) -> RenderedQuery {
        match self.backend {
            Backend::DocumentStore => RenderedQuery::Dsl(dsl::search_request(query, &self.settings)),
            Backend::Relational => RenderedQuery::Sql(sql::search_statement(query, &self.settings)),
            Backend::Embedded => RenderedQuery::Native(Box::new(query.clone())),
        }
    }

    /// Count query for lexical and regex searches; `None` for modes whose count is unknown
    pub fn render_count(&self, query: &BuiltQuery) -> Option<RenderedQuery> {
        if !query.spec.mode.has_exact_count() {
            return None;
        }
        Some(match self.backend {
            Backend::DocumentStore => RenderedQuery::Dsl(dsl::count_request(query, &self.settings)),
            Backend::Relational => RenderedQuery::Sql(sql::count_statement(query, &self.settings)),
            Backend::Embedded => RenderedQuery::Native(Box::new(query.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicGateway;
    use crate::query::{BuilderSettings, QueryBuilder, SearchOptions};
    use std::sync::Arc;

    async fn hybrid() -> BuiltQuery {
        QueryBuilder::new(BuilderSettings::default(), Arc::new(DeterministicGateway::new()))
            .build("hybrid", "aloha mai", &SearchOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_hybrid_splits_unless_native() {
        let query = hybrid().await;

        let es = Renderer::new(Backend::DocumentStore, RenderSettings::default());
        assert!(matches!(es.render(&query), RenderedQuery::Dsl(_)));

        for backend in [Backend::Relational, Backend::Embedded] {
            let renderer = Renderer::new(backend, RenderSettings::default());
            match renderer.render(&query) {
                RenderedQuery::Split { lexical, vector } => {
                    assert_ne!(lexical, vector);
                }
                other => panic!("{} should split, got {:?}", backend, other),
            }
        }
    }

    #[tokio::test]
    async fn test_rendering_is_deterministic() {
        let query = hybrid().await;
        for backend in [Backend::DocumentStore, Backend::Relational, Backend::Embedded] {
            let renderer = Renderer::new(backend, RenderSettings::default());
            assert_eq!(renderer.render(&query), renderer.render(&query));
        }
    }

    #[tokio::test]
    async fn test_no_count_for_hybrid() {
        let query = hybrid().await;
        let renderer = Renderer::new(Backend::Relational, RenderSettings::default());
        assert!(renderer.render_count(&query).is_none());
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("relational").unwrap(), Backend::Relational);
        assert!(Backend::parse("postgres").is_err());
        assert!(Backend::DocumentStore.fuses_natively());
        assert!(!Backend::Embedded.fuses_natively());
    }
}
