//! Turns (mode, text, options) into a `BuiltQuery`
//!
//! Everything that can be rejected without I/O is rejected first: the mode,
//! an empty query, a malformed regex, a supplied vector of the wrong length.
//! Only then is the embedding service called, and a failure there is an error,
//! never a silent fallback to lexical search.

use super::highlight::HighlightDirective;
use super::ir::{BuiltQuery, Constraint, LexicalQuery, QualityBoost, QueryIr, TextField, VectorQuery};
use super::mode::{Granularity, ModeSpec, SearchMode, SearchOptions};
use crate::config::{HighlightConfig, SearchConfig};
use crate::corpus::{fold_diacritics, tokenize};
use crate::embedding::EmbeddingGateway;
use crate::error::{LaanaError, Result};
use crate::vector::{EmbeddingPrefix, ModelTier, VectorField};
use regex::RegexBuilder;
use std::sync::Arc;
use tracing::debug;

/// Builder settings taken from the search configuration
#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub near_window: usize,
    pub quality_field: String,
    pub knn_candidate_multiplier: usize,
    pub hybrid_candidate_multiplier: usize,
    pub highlight: HighlightConfig,
}

impl From<&SearchConfig> for BuilderSettings {
    fn from(config: &SearchConfig) -> Self {
        Self {
            near_window: config.near_window,
            quality_field: config.quality_field.clone(),
            knn_candidate_multiplier: config.knn_candidate_multiplier,
            hybrid_candidate_multiplier: config.hybrid_candidate_multiplier,
            highlight: config.highlight.clone(),
        }
    }
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

/// Vector field searched at each granularity
pub fn target_vector_field(granularity: Granularity) -> VectorField {
    match granularity {
        Granularity::Document => VectorField::new(granularity.entity(), ModelTier::Large),
        Granularity::Sentence => VectorField::new(granularity.entity(), ModelTier::Small),
    }
}

pub struct QueryBuilder {
    settings: BuilderSettings,
    gateway: Option<Arc<dyn EmbeddingGateway>>,
}

impl QueryBuilder {
    pub fn new(settings: BuilderSettings, gateway: Arc<dyn EmbeddingGateway>) -> Self {
        Self {
            settings,
            gateway: Some(gateway),
        }
    }

    /// A builder that never embeds; vector modes then need `options.vector`
    pub fn without_embeddings(settings: BuilderSettings) -> Self {
        Self {
            settings,
            gateway: None,
        }
    }

    /// Build a query from a mode name
    pub async fn build(&self, mode: &str, text: &str, options: &SearchOptions) -> Result<BuiltQuery> {
        let spec = ModeSpec::parse(mode)?;
        self.build_spec(spec, text, options).await
    }

    pub async fn build_spec(
        &self,
        spec: ModeSpec,
        text: &str,
        options: &SearchOptions,
    ) -> Result<BuiltQuery> {
        if options.k == 0 {
            return Err(LaanaError::InvalidQuery("k must be greater than 0".to_string()));
        }

        let field = text_field(spec.mode, options.diacritic_sensitive);
        let ir = match spec.mode {
            SearchMode::Vector | SearchMode::Knn => {
                let vector = self.query_vector(spec, text, options).await?;
                QueryIr::Vector(self.vector_query(spec, vector, options))
            }
            SearchMode::Hybrid => {
                let lexical = self.lexical(SearchMode::Match, text, field, options)?;
                let vector = self.query_vector(spec, text, options).await?;
                QueryIr::Hybrid {
                    lexical,
                    vector: self.vector_query(spec, vector, options),
                }
            }
            _ => self.ir_without_vector(spec.mode, text, field, options)?,
        };

        Ok(self.finish(spec, text, ir, field, options))
    }

    /// Build a query that needs no embedding; vector modes are rejected
    pub fn build_lexical(&self, spec: ModeSpec, text: &str, options: &SearchOptions) -> Result<BuiltQuery> {
        if spec.mode.needs_vector() {
            return Err(LaanaError::InvalidQuery(format!(
                "{} needs a query embedding",
                spec
            )));
        }
        let field = text_field(spec.mode, options.diacritic_sensitive);
        let ir = self.ir_without_vector(spec.mode, text, field, options)?;
        Ok(self.finish(spec, text, ir, field, options))
    }

    fn finish(
        &self,
        spec: ModeSpec,
        text: &str,
        ir: QueryIr,
        field: TextField,
        options: &SearchOptions,
    ) -> BuiltQuery {
        let highlight = if options.highlight {
            HighlightDirective::for_query(spec, &ir, text, field, &self.settings.highlight)
        } else {
            None
        };

        let boost = match ir {
            QueryIr::Lexical(_) | QueryIr::Regex { .. } => {
                Some(QualityBoost::new(self.settings.quality_field.clone()))
            }
            _ => None,
        };

        let built = BuiltQuery {
            spec,
            text: text.to_string(),
            ir,
            highlight,
            filters: options.filters.clone(),
            boost,
            ordering: options.ordering.clone(),
            k: options.k,
            offset: options.offset,
        };
        debug!("Built {} query: {:?}", spec, built.ir);
        built
    }

    fn ir_without_vector(
        &self,
        mode: SearchMode,
        text: &str,
        field: TextField,
        options: &SearchOptions,
    ) -> Result<QueryIr> {
        if mode == SearchMode::Regex {
            let pattern = if field.is_folded() {
                fold_diacritics(text)
            } else {
                text.to_string()
            };
            if pattern.is_empty() {
                return Err(LaanaError::InvalidQuery("Empty pattern".to_string()));
            }
            RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| LaanaError::InvalidQuery(format!("Invalid regex: {}", e)))?;
            return Ok(QueryIr::Regex { pattern, field });
        }
        Ok(QueryIr::Lexical(self.lexical(mode, text, field, options)?))
    }

    fn lexical(
        &self,
        mode: SearchMode,
        text: &str,
        field: TextField,
        options: &SearchOptions,
    ) -> Result<LexicalQuery> {
        let constraint = match mode {
            SearchMode::Exact => Constraint::Exact,
            SearchMode::Any => Constraint::Any,
            SearchMode::All => Constraint::All,
            SearchMode::Near => Constraint::Near {
                window: options.near_window.unwrap_or(self.settings.near_window).max(1),
            },
            SearchMode::Term => Constraint::Term,
            SearchMode::Phrase => Constraint::Phrase,
            _ => Constraint::Match,
        };

        let raw = if field.is_folded() {
            fold_diacritics(text.trim())
        } else {
            text.trim().to_string()
        };
        let terms: Vec<String> = tokenize(&raw).into_iter().map(|t| t.text).collect();
        if terms.is_empty() {
            return Err(LaanaError::InvalidQuery(format!(
                "No searchable terms in '{}'",
                text
            )));
        }

        Ok(LexicalQuery {
            terms,
            raw,
            constraint,
            field,
        })
    }

    fn vector_query(&self, spec: ModeSpec, vector: Vec<f32>, options: &SearchOptions) -> VectorQuery {
        let field = target_vector_field(spec.granularity);
        let k = options.offset + options.k;
        match (spec.mode, spec.granularity) {
            (SearchMode::Vector, Granularity::Document) => VectorQuery {
                vector,
                field,
                k,
                num_candidates: k,
                exhaustive: true,
                boost: None,
            },
            (SearchMode::Hybrid, Granularity::Document) => VectorQuery {
                vector,
                field,
                k: k * self.settings.hybrid_candidate_multiplier,
                num_candidates: k * self.settings.hybrid_candidate_multiplier,
                exhaustive: true,
                boost: None,
            },
            (SearchMode::Hybrid, Granularity::Sentence) => {
                let candidates = k * self.settings.hybrid_candidate_multiplier;
                VectorQuery {
                    vector,
                    field,
                    k: candidates,
                    num_candidates: candidates * self.settings.hybrid_candidate_multiplier,
                    exhaustive: false,
                    boost: Some(1.5),
                }
            }
            // knn everywhere, and vector at sentence level
            _ => VectorQuery {
                vector,
                field,
                k,
                num_candidates: k * self.settings.knn_candidate_multiplier,
                exhaustive: false,
                boost: None,
            },
        }
    }

    async fn query_vector(
        &self,
        spec: ModeSpec,
        text: &str,
        options: &SearchOptions,
    ) -> Result<Vec<f32>> {
        let tier = target_vector_field(spec.granularity).tier;

        if let Some(vector) = &options.vector {
            if vector.len() != tier.dimension() {
                return Err(LaanaError::InvalidQuery(format!(
                    "Query vector has {} dimensions, {} needs {}",
                    vector.len(),
                    spec,
                    tier.dimension()
                )));
            }
            return Ok(vector.clone());
        }

        if text.trim().is_empty() {
            return Err(LaanaError::InvalidQuery("Empty query".to_string()));
        }

        let gateway = self.gateway.as_ref().ok_or_else(|| {
            LaanaError::EmbeddingUnavailable("no embedding gateway configured".to_string())
        })?;

        let vector = gateway
            .embed(text.trim(), EmbeddingPrefix::Query, tier)
            .await
            .map_err(|e| LaanaError::EmbeddingUnavailable(e.to_string()))?;

        if vector.len() != tier.dimension() {
            return Err(LaanaError::EmbeddingUnavailable(format!(
                "service returned {} dimensions for the {} tier",
                vector.len(),
                tier
            )));
        }
        Ok(vector)
    }
}

fn text_field(mode: SearchMode, diacritic_sensitive: bool) -> TextField {
    if !diacritic_sensitive {
        TextField::Folded
    } else if matches!(mode, SearchMode::Regex) {
        TextField::Raw
    } else {
        TextField::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicGateway;

    fn builder() -> QueryBuilder {
        QueryBuilder::new(BuilderSettings::default(), Arc::new(DeterministicGateway::new()))
    }

    #[tokio::test]
    async fn test_unsupported_mode_before_io() {
        let gateway = Arc::new(DeterministicGateway::new());
        let builder = QueryBuilder::new(BuilderSettings::default(), gateway.clone());
        let err = builder
            .build("fuzzyvector", "aloha", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LaanaError::UnsupportedMode { .. }));
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_near_uses_configured_window() {
        let built = builder()
            .build("near", "aloha mai", &SearchOptions::default())
            .await
            .unwrap();
        match built.ir {
            QueryIr::Lexical(l) => {
                assert_eq!(l.constraint, Constraint::Near { window: 2 });
                assert_eq!(l.terms, vec!["aloha", "mai"]);
            }
            other => panic!("unexpected IR {:?}", other),
        }
        assert!(built.boost.is_some());
    }

    #[tokio::test]
    async fn test_bad_regex_is_invalid_query() {
        let err = builder()
            .build("regex", "(unclosed", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LaanaError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_regex_is_not_anchored() {
        let built = builder()
            .build("regexp", "ali.*", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(
            built.ir,
            QueryIr::Regex {
                pattern: "ali.*".to_string(),
                field: TextField::Raw
            }
        );
    }

    #[tokio::test]
    async fn test_vector_embeds_with_query_prefix_and_tier() {
        let gateway = Arc::new(DeterministicGateway::new());
        let builder = QueryBuilder::new(BuilderSettings::default(), gateway.clone());
        let built = builder
            .build("knnsentence", "aloha", &SearchOptions::default())
            .await
            .unwrap();
        let v = built.ir.vector_query().unwrap();
        assert_eq!(v.field.dsl_name(), "vector");
        assert_eq!(v.num_candidates, 100);
        assert_eq!(
            v.vector,
            DeterministicGateway::vector_for("aloha", EmbeddingPrefix::Query, ModelTier::Small)
        );
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_supplied_vector_skips_embedding() {
        let gateway = Arc::new(DeterministicGateway::new());
        let builder = QueryBuilder::new(BuilderSettings::default(), gateway.clone());
        let options = SearchOptions {
            vector: Some(vec![0.0; 1024]),
            ..SearchOptions::default()
        };
        let built = builder.build("vector", "aloha", &options).await.unwrap();
        assert!(built.ir.vector_query().unwrap().exhaustive);
        assert_eq!(gateway.calls(), 0);

        let wrong = SearchOptions {
            vector: Some(vec![0.0; 384]),
            ..SearchOptions::default()
        };
        assert!(builder.build("vector", "aloha", &wrong).await.is_err());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_hard_error() {
        let builder = QueryBuilder::new(
            BuilderSettings::default(),
            Arc::new(DeterministicGateway::new().fail_on("aloha")),
        );
        let err = builder
            .build("hybrid", "aloha", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LaanaError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_hybrid_has_both_halves() {
        let built = builder()
            .build("hybridsentence", "aloha mai", &SearchOptions::default())
            .await
            .unwrap();
        match &built.ir {
            QueryIr::Hybrid { lexical, vector } => {
                assert_eq!(lexical.constraint, Constraint::Match);
                assert_eq!(vector.k, 50);
                assert_eq!(vector.num_candidates, 250);
                assert_eq!(vector.boost, Some(1.5));
            }
            other => panic!("unexpected IR {:?}", other),
        }
        assert!(built.boost.is_none());
    }

    #[tokio::test]
    async fn test_diacritic_insensitive_folds_query() {
        let options = SearchOptions {
            diacritic_sensitive: false,
            ..SearchOptions::default()
        };
        let built = builder().build("phrase", "ʻŌlelo Hawaiʻi", &options).await.unwrap();
        let lexical = built.ir.lexical_query().unwrap();
        assert_eq!(lexical.field, TextField::Folded);
        assert_eq!(lexical.terms, vec!["olelo", "hawaii"]);
    }

    #[test]
    fn test_build_lexical_rejects_vector_modes() {
        let b = QueryBuilder::without_embeddings(BuilderSettings::default());
        let spec = ModeSpec::parse("knn").unwrap();
        assert!(b.build_lexical(spec, "aloha", &SearchOptions::default()).is_err());
        let spec = ModeSpec::parse("all").unwrap();
        assert!(b.build_lexical(spec, "aloha mai", &SearchOptions::default()).is_ok());
    }

    #[tokio::test]
    async fn test_highlight_directive_attached_on_request() {
        let options = SearchOptions {
            highlight: true,
            ..SearchOptions::default()
        };
        let built = builder().build("regex", "kai.*", &options).await.unwrap();
        let directive = built.highlight.unwrap();
        assert_eq!(directive.fragment_size, 500);
        assert_eq!(directive.fragments, 3);
    }
}
