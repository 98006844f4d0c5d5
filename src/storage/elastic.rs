//! Search-engine client
//!
//! Executes rendered DSL requests, serves scroll sessions to the leased
//! cursor and applies vector updates through `_bulk`.

use crate::backfill::{BulkWriteResult, BulkWriter, ItemOutcome, ItemResult, Submission, VectorUpdate};
use crate::config::SearchConfig;
use crate::corpus::{CorpusEntity, DocumentMeta, EntityId, EntityKind};
use crate::cursor::{KeysetSource, ScrollPage, ScrollSource};
use crate::error::{LaanaError, Result};
use crate::query::render::DslRequest;
use crate::query::{Backend, RenderedQuery};
use crate::retrieval::{HitPage, RawHit, SearchExecutor};
use crate::vector::VectorField;
use ahash::AHashMap;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_ON_CONFLICT: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Client for the document-store backend
pub struct ElasticStore {
    client: Client,
    base_url: String,
    documents_index: String,
    sentences_index: String,
    quality_field: String,
}

impl ElasticStore {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.engine_url.trim_end_matches('/').to_string(),
            documents_index: config.documents_index.clone(),
            sentences_index: config.sentences_index.clone(),
            quality_field: config.quality_field.clone(),
        })
    }

    fn index_for(&self, entity: EntityKind) -> &str {
        match entity {
            EntityKind::Document => &self.documents_index,
            EntityKind::Sentence => &self.sentences_index,
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<(StatusCode, Value)> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| LaanaError::Json {
                source: e,
                context: format!("{} {} returned {}", method, path, status),
            })?
        };
        Ok((status, value))
    }

    /// Send and fail on any non-success status
    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let (status, value) = self.send(method.clone(), path, body).await?;
        if !status.is_success() {
            return Err(LaanaError::Store(format!(
                "{} {} returned {}: {}",
                method,
                path,
                status,
                error_reason(&value)
            )));
        }
        Ok(value)
    }

    async fn run_dsl(&self, request: &DslRequest) -> Result<Value> {
        debug!(
            "{} {}: {}",
            request.index,
            request.endpoint,
            request.body
        );
        self.call(
            Method::POST,
            &format!("{}/{}", request.index, request.endpoint),
            Some(&request.body),
        )
        .await
    }

    fn parse_hit(&self, hit: &Value, sentences: bool) -> Option<RawHit> {
        let id = parse_id(hit.get("_id")?)?;
        let source = hit.get("_source").cloned().unwrap_or(Value::Null);
        let text = source.get("text").and_then(Value::as_str).unwrap_or_default();
        let string = |key: &str| source.get(key).and_then(Value::as_str).map(str::to_string);

        let mut raw = RawHit::new(id, hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0) as f32, text);
        raw.quality_ratio = source.get(&self.quality_field).and_then(Value::as_f64).map(|q| q as f32);
        raw.source_id = if sentences {
            source.get("doc_id").and_then(parse_id)
        } else {
            None
        };
        raw.meta = DocumentMeta {
            group_name: string("groupname"),
            source_name: string("sourcename"),
            authors: string("authors"),
            date: string("date"),
        };
        raw.highlights = hit
            .pointer("/highlight/text")
            .and_then(Value::as_array)
            .map(|fragments| fragments.iter().filter_map(Value::as_str).map(str::to_string).collect());
        Some(raw)
    }

    fn scroll_page(&self, value: &Value) -> Result<ScrollPage> {
        let scroll_id = value
            .get("_scroll_id")
            .and_then(Value::as_str)
            .ok_or_else(|| LaanaError::Store("scroll response without _scroll_id".to_string()))?
            .to_string();
        let entities = hits_of(value)
            .iter()
            .filter_map(|hit| {
                let id = parse_id(hit.get("_id")?)?;
                let text = hit.pointer("/_source/text").and_then(Value::as_str).unwrap_or_default();
                Some(CorpusEntity::new(id, text))
            })
            .collect();
        Ok(ScrollPage { scroll_id, entities })
    }
}

fn hits_of(value: &Value) -> &[Value] {
    value
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Ids are stored as strings or numbers depending on how the index was built
fn parse_id(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn error_reason(value: &Value) -> String {
    value
        .pointer("/error/reason")
        .or_else(|| value.get("error"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| value.to_string())
}

/// NDJSON body for a partial-update `_bulk` request
pub fn bulk_body(field: VectorField, updates: &[VectorUpdate]) -> String {
    let mut body = String::new();
    for update in updates {
        let action = json!({
            "update": {
                "_id": update.entity_id().to_string(),
                "retry_on_conflict": RETRY_ON_CONFLICT,
            }
        });
        let doc = json!({ "doc": { field.dsl_name(): update.vector() } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&doc.to_string());
        body.push('\n');
    }
    body
}

/// Per-item outcomes of a `_bulk` response, in response order
pub fn parse_bulk_response(value: &Value) -> BulkWriteResult {
    let items = value
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let results = items
        .iter()
        .filter_map(|item| {
            let op = item.get("update").or_else(|| item.get("index"))?;
            let id = parse_id(op.get("_id")?)?;
            let status = op.get("status").and_then(Value::as_u64).unwrap_or(0);
            let outcome = match status {
                200 | 201 => ItemOutcome::Applied,
                409 => ItemOutcome::VersionConflict,
                400 => ItemOutcome::ValidationError(error_reason(op)),
                _ => ItemOutcome::TransportError(format!("status {}: {}", status, error_reason(op))),
            };
            Some(ItemResult::new(id, outcome))
        })
        .collect();
    BulkWriteResult::new(results)
}

#[async_trait]
impl SearchExecutor for ElasticStore {
    fn backend(&self) -> Backend {
        Backend::DocumentStore
    }

    async fn execute(&self, query: &RenderedQuery) -> Result<HitPage> {
        let RenderedQuery::Dsl(request) = query else {
            return Err(LaanaError::InvalidQuery(
                "document store executes DSL requests only".to_string(),
            ));
        };
        let sentences = request.index == self.sentences_index;
        let value = self.run_dsl(request).await?;
        let hits = hits_of(&value)
            .iter()
            .filter_map(|hit| {
                let parsed = self.parse_hit(hit, sentences);
                if parsed.is_none() {
                    warn!("Skipping hit without a numeric _id in {}", request.index);
                }
                parsed
            })
            .collect();
        let total = value.pointer("/hits/total/value").and_then(Value::as_u64);
        Ok(HitPage { hits, total })
    }

    async fn count(&self, query: &RenderedQuery) -> Result<u64> {
        let RenderedQuery::Dsl(request) = query else {
            return Err(LaanaError::InvalidQuery(
                "document store executes DSL requests only".to_string(),
            ));
        };
        let value = self.run_dsl(request).await?;
        value
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| LaanaError::Store("count response without count".to_string()))
    }

    async fn document_metadata(&self, ids: &[EntityId]) -> Result<AHashMap<EntityId, DocumentMeta>> {
        if ids.is_empty() {
            return Ok(AHashMap::new());
        }
        let body = json!({
            "size": ids.len(),
            "_source": ["groupname", "sourcename", "authors", "date"],
            "query": { "ids": { "values": ids.iter().map(|id| id.to_string()).collect::<Vec<_>>() } },
        });
        let value = self
            .call(Method::POST, &format!("{}/_search", self.documents_index), Some(&body))
            .await?;
        Ok(hits_of(&value)
            .iter()
            .filter_map(|hit| {
                let parsed = self.parse_hit(hit, false)?;
                Some((parsed.id, parsed.meta))
            })
            .collect())
    }
}

#[async_trait]
impl ScrollSource for ElasticStore {
    async fn open_scroll(&self, field: VectorField, batch_size: usize, keep_alive: &str) -> Result<ScrollPage> {
        let body = json!({
            "size": batch_size,
            "_source": ["text"],
            "query": { "bool": { "must_not": { "exists": { "field": field.dsl_name() } } } },
            "sort": ["_doc"],
        });
        let path = format!("{}/_search?scroll={}", self.index_for(field.entity), keep_alive);
        let value = self.call(Method::POST, &path, Some(&body)).await?;
        self.scroll_page(&value)
    }

    async fn continue_scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage> {
        let body = json!({ "scroll": keep_alive, "scroll_id": scroll_id });
        let (status, value) = self.send(Method::POST, "_search/scroll", Some(&body)).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(LaanaError::CursorExpired(format!(
                "scroll session is gone: {}",
                error_reason(&value)
            )));
        }
        if !status.is_success() {
            return Err(LaanaError::Store(format!(
                "scroll returned {}: {}",
                status,
                error_reason(&value)
            )));
        }
        self.scroll_page(&value)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let body = json!({ "scroll_id": [scroll_id] });
        let (status, value) = self.send(Method::DELETE, "_search/scroll", Some(&body)).await?;
        // Already expired counts as released
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(LaanaError::Store(format!(
            "clearing scroll returned {}: {}",
            status,
            error_reason(&value)
        )))
    }
}

/// Single-entity lookups only; traversal goes through scroll sessions
#[async_trait]
impl KeysetSource for ElasticStore {
    async fn fetch_missing_after(
        &self,
        _field: VectorField,
        _after: Option<EntityId>,
        _limit: usize,
    ) -> Result<Vec<CorpusEntity>> {
        Err(LaanaError::Config(
            "the document store is traversed with the leased cursor".to_string(),
        ))
    }

    async fn fetch_by_id(&self, entity: EntityKind, id: EntityId) -> Result<Option<CorpusEntity>> {
        let path = format!("{}/_doc/{}?_source=text", self.index_for(entity), id);
        let (status, value) = self.send(Method::GET, &path, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LaanaError::Store(format!("{} returned {}: {}", path, status, error_reason(&value))));
        }
        let text = value.pointer("/_source/text").and_then(Value::as_str).unwrap_or_default();
        Ok(Some(CorpusEntity::new(id, text)))
    }
}

#[async_trait]
impl BulkWriter for ElasticStore {
    async fn submit(&self, field: VectorField, updates: &[VectorUpdate]) -> Result<Submission> {
        let url = format!("{}/{}/_bulk", self.base_url, self.index_for(field.entity));
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(field, updates))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LaanaError::Store(format!("_bulk returned {}: {}", status, detail)));
        }
        let value: Value = response.json().await?;
        let result = parse_bulk_response(&value);
        debug!(
            "_bulk on {}: {}/{} applied",
            field.dsl_name(),
            result.applied(),
            updates.len()
        );
        Ok(Submission::Settled(result))
    }
}
