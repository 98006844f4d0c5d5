//! Search front door: build, render, execute, fuse, page

use super::ranker::{order_by_relevance, quality_index};
use super::{HitPage, HybridRanker, RankWeights, RawHit, ResultCount, SearchExecutor};
use crate::config::SearchConfig;
use crate::corpus::{DocumentMeta, EntityId};
use crate::embedding::EmbeddingGateway;
use crate::error::{LaanaError, Result};
use crate::query::{
    Backend, BuilderSettings, BuiltQuery, Granularity, ModeSpec, Ordering, QueryBuilder,
    RenderSettings, RenderedQuery, Renderer, SearchOptions,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub mode: String,
    pub hits: Vec<RawHit>,
    pub total: ResultCount,
}

pub struct SearchService {
    builder: QueryBuilder,
    renderer: Renderer,
    ranker: HybridRanker,
    executor: Option<Arc<dyn SearchExecutor>>,
}

impl SearchService {
    pub fn new(
        builder: QueryBuilder,
        renderer: Renderer,
        ranker: HybridRanker,
        executor: Option<Arc<dyn SearchExecutor>>,
    ) -> Self {
        Self {
            builder,
            renderer,
            ranker,
            executor,
        }
    }

    /// Wire a service from configuration; without an executor it can only explain
    pub fn from_config(
        config: &SearchConfig,
        gateway: Arc<dyn EmbeddingGateway>,
        executor: Option<Arc<dyn SearchExecutor>>,
    ) -> Result<Self> {
        let backend = Backend::parse(&config.backend)?;
        if let Some(executor) = &executor {
            if executor.backend() != backend {
                return Err(LaanaError::Config(format!(
                    "Executor serves {} but search.backend is {}",
                    executor.backend(),
                    backend
                )));
            }
        }
        let weights = RankWeights::for_backend(backend).with_overrides(config.weights.as_ref());
        Ok(Self::new(
            QueryBuilder::new(BuilderSettings::from(config), gateway),
            Renderer::new(backend, RenderSettings::from(config)),
            HybridRanker::new(weights),
            executor,
        ))
    }

    fn executor(&self) -> Result<&Arc<dyn SearchExecutor>> {
        self.executor.as_ref().ok_or_else(|| {
            LaanaError::Config(format!(
                "No executor for the {} backend; only query rendering is available",
                self.renderer.backend()
            ))
        })
    }

    /// Build and render without executing
    pub async fn explain(&self, mode: &str, text: &str, options: &SearchOptions) -> Result<RenderedQuery> {
        let query = self.builder.build(mode, text, options).await?;
        Ok(self.renderer.render(&query))
    }

    pub async fn search(&self, mode: &str, text: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let spec = ModeSpec::parse(mode)?;
        let executor = self.executor()?;
        let query = self.builder.build_spec(spec, text, options).await?;
        let rendered = self.renderer.render(&query);

        let mut hits = match &rendered {
            RenderedQuery::Split { lexical, vector } => {
                let (lexical, vector) = tokio::join!(executor.execute(lexical), executor.execute(vector));
                let (lexical, vector) = (lexical?, vector?);
                debug!(
                    "Fusing {} lexical and {} vector hits",
                    lexical.hits.len(),
                    vector.hits.len()
                );
                self.fuse(&query, lexical, vector)
            }
            single => {
                let page = executor.execute(single).await?;
                let mut hits = page.hits;
                if query.ordering == Ordering::Relevance {
                    order_by_relevance(&mut hits);
                }
                hits
            }
        };

        if spec.granularity == Granularity::Sentence {
            self.denormalize(executor.as_ref(), &mut hits).await?;
        }

        // Vector-scored modes report no count, even when a page came back
        let total = if spec.mode.has_exact_count() {
            match self.count_built(&query).await? {
                Some(n) => ResultCount::Exact(n),
                None => ResultCount::Unknown,
            }
        } else {
            ResultCount::Unknown
        };

        info!("{} search returned {} hits", spec, hits.len());
        Ok(SearchResponse {
            mode: spec.to_string(),
            hits,
            total,
        })
    }

    /// Number of matches; `Unknown` for vector, kNN and hybrid modes without any I/O
    pub async fn count(&self, mode: &str, text: &str, options: &SearchOptions) -> Result<ResultCount> {
        let spec = ModeSpec::parse(mode)?;
        if !spec.mode.has_exact_count() {
            return Ok(ResultCount::Unknown);
        }
        let query = self.builder.build_lexical(spec, text, options)?;
        Ok(match self.count_built(&query).await? {
            Some(n) => ResultCount::Exact(n),
            None => ResultCount::Unknown,
        })
    }

    async fn count_built(&self, query: &BuiltQuery) -> Result<Option<u64>> {
        match self.renderer.render_count(query) {
            Some(rendered) => Ok(Some(self.executor()?.count(&rendered).await?)),
            None => Ok(None),
        }
    }

    fn fuse(&self, query: &BuiltQuery, lexical: HitPage, vector: HitPage) -> Vec<RawHit> {
        let quality = quality_index(lexical.hits.iter().chain(vector.hits.iter()));
        self.ranker
            .rank(lexical.hits, vector.hits, &quality, query.window())
            .into_iter()
            .skip(query.offset)
            .take(query.k)
            .collect()
    }

    /// Fill document metadata on sentence hits that came back without it
    async fn denormalize(&self, executor: &dyn SearchExecutor, hits: &mut [RawHit]) -> Result<()> {
        let mut ids: Vec<EntityId> = hits
            .iter()
            .filter(|h| h.meta == DocumentMeta::default())
            .filter_map(|h| h.source_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(());
        }

        let metadata = executor.document_metadata(&ids).await?;
        for hit in hits.iter_mut() {
            if let Some(meta) = hit.source_id.and_then(|id| metadata.get(&id)) {
                if hit.meta == DocumentMeta::default() {
                    hit.meta = meta.clone();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DeterministicGateway;
    use ahash::AHashMap;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[derive(Default)]
    struct ScriptedExecutor {
        executed: AtomicUsize,
        counted: AtomicUsize,
    }

    #[async_trait]
    impl SearchExecutor for ScriptedExecutor {
        fn backend(&self) -> Backend {
            Backend::Embedded
        }

        async fn execute(&self, query: &RenderedQuery) -> Result<HitPage> {
            self.executed.fetch_add(1, AtomicOrdering::SeqCst);
            let built = match query {
                RenderedQuery::Native(built) => built,
                other => panic!("unexpected {:?}", other),
            };
            let hits = if built.ir.vector_query().is_some() {
                vec![RawHit::new(3, 0.9, "c"), RawHit::new(2, 0.1, "b")]
            } else {
                vec![RawHit::new(1, 2.0, "a"), RawHit::new(2, 1.0, "b")]
            };
            let hits = hits
                .into_iter()
                .map(|mut h| {
                    h.source_id = Some(100 + h.id);
                    h
                })
                .collect();
            Ok(HitPage { hits, total: Some(2) })
        }

        async fn count(&self, _query: &RenderedQuery) -> Result<u64> {
            self.counted.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(2)
        }

        async fn document_metadata(&self, ids: &[EntityId]) -> Result<AHashMap<EntityId, DocumentMeta>> {
            Ok(ids
                .iter()
                .map(|id| {
                    (
                        *id,
                        DocumentMeta {
                            source_name: Some(format!("source {}", id)),
                            ..DocumentMeta::default()
                        },
                    )
                })
                .collect())
        }
    }

    fn service(executor: Arc<ScriptedExecutor>, gateway: Arc<DeterministicGateway>) -> SearchService {
        SearchService::from_config(&SearchConfig::default(), gateway, Some(executor)).unwrap()
    }

    #[tokio::test]
    async fn test_hybrid_count_is_unknown_without_io() {
        let executor = Arc::new(ScriptedExecutor::default());
        let gateway = Arc::new(DeterministicGateway::new());
        let svc = service(executor.clone(), gateway.clone());

        for mode in ["hybrid", "vector", "knnsentence"] {
            let count = svc.count(mode, "aloha", &SearchOptions::default()).await.unwrap();
            assert_eq!(count, ResultCount::Unknown);
        }
        assert_eq!(gateway.calls(), 0);
        assert_eq!(executor.executed.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(executor.counted.load(AtomicOrdering::SeqCst), 0);

        let exact = svc.count("match", "aloha", &SearchOptions::default()).await.unwrap();
        assert_eq!(exact, ResultCount::Exact(2));
    }

    #[tokio::test]
    async fn test_hybrid_runs_both_halves_and_fuses() {
        let executor = Arc::new(ScriptedExecutor::default());
        let svc = service(executor.clone(), Arc::new(DeterministicGateway::new()));
        let response = svc.search("hybrid", "aloha", &SearchOptions::default()).await.unwrap();

        assert_eq!(executor.executed.load(AtomicOrdering::SeqCst), 2);
        let ids: Vec<EntityId> = response.hits.iter().map(|h| h.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(response.total, ResultCount::Unknown);
    }

    #[tokio::test]
    async fn test_sentence_hits_get_document_metadata() {
        let executor = Arc::new(ScriptedExecutor::default());
        let svc = service(executor, Arc::new(DeterministicGateway::new()));
        let response = svc
            .search("matchsentence", "aloha", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.hits[0].id, 1);
        assert_eq!(response.hits[0].meta.source_name.as_deref(), Some("source 101"));
        assert_eq!(response.total, ResultCount::Exact(2));
    }

    #[tokio::test]
    async fn test_unsupported_mode_fails_first() {
        let executor = Arc::new(ScriptedExecutor::default());
        let svc = service(executor.clone(), Arc::new(DeterministicGateway::new()));
        let err = svc.search("fuzzy", "aloha", &SearchOptions::default()).await.unwrap_err();
        assert!(matches!(err, LaanaError::UnsupportedMode { .. }));
        assert_eq!(executor.executed.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_explain_without_executor() {
        let mut config = SearchConfig::default();
        config.backend = "relational".to_string();
        let svc = SearchService::from_config(&config, Arc::new(DeterministicGateway::new()), None).unwrap();
        let rendered = svc.explain("phrase", "aloha mai", &SearchOptions::default()).await.unwrap();
        assert!(matches!(rendered, RenderedQuery::Sql(_)));
        assert!(svc.search("phrase", "aloha mai", &SearchOptions::default()).await.is_err());
    }
}
