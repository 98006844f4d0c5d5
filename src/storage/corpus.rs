//! The local corpus as a search executor, keyset source and bulk writer
//!
//! Queries are evaluated in process: lexical constraints with the same
//! matcher that drives highlighting, regexes with the `regex` crate and
//! vectors by brute-force cosine similarity.

use super::Database;
use crate::backfill::{BulkWriteResult, BulkWriter, ItemOutcome, ItemResult, PendingTransaction, Submission, VectorUpdate};
use crate::corpus::{fold_diacritics, CorpusEntity, Document, DocumentMeta, EntityId, EntityKind, Sentence};
use crate::cursor::KeysetSource;
use crate::error::{LaanaError, Result};
use crate::query::{
    Backend, BuiltQuery, Filters, Granularity, Highlighter, LexicalMatcher, Ordering, QueryIr, RenderedQuery,
    SortField,
};
use crate::retrieval::{order_by_relevance, HitPage, RawHit, SearchExecutor};
use crate::vector::{cosine_similarity, decode_blob, encode_blob, VectorField};
use ahash::AHashMap;
use async_trait::async_trait;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use regex::RegexBuilder;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::cmp::Ordering as CmpOrdering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

fn table(entity: EntityKind) -> (&'static str, &'static str) {
    match entity {
        EntityKind::Document => ("documents", "source_id"),
        EntityKind::Sentence => ("sentences", "sentence_id"),
    }
}

/// A corpus row with document metadata joined in
struct CandidateRow {
    id: EntityId,
    source_id: EntityId,
    text: String,
    quality_ratio: Option<f32>,
    meta: DocumentMeta,
    vector: Option<Vec<f32>>,
}

impl CandidateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let blob: Option<Vec<u8>> = row.get(8)?;
        Ok(Self {
            id: row.get(0)?,
            source_id: row.get(1)?,
            text: row.get(2)?,
            quality_ratio: row.get::<_, Option<f64>>(3)?.map(|q| q as f32),
            meta: DocumentMeta {
                group_name: row.get(4)?,
                source_name: row.get(5)?,
                authors: row.get(6)?,
                date: row.get(7)?,
            },
            vector: blob.map(|b| decode_blob(&b)),
        })
    }

    fn passes(&self, filters: &Filters) -> bool {
        let year = self
            .meta
            .date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse::<i32>().ok());
        if filters.date_from.is_some() || filters.date_to.is_some() {
            let Some(year) = year else {
                return false;
            };
            if filters.date_from.is_some_and(|from| year < from) || filters.date_to.is_some_and(|to| year > to) {
                return false;
            }
        }
        let equals = |wanted: &Option<String>, actual: &Option<String>| match wanted {
            Some(w) => actual.as_deref() == Some(w.as_str()),
            None => true,
        };
        equals(&filters.group_name, &self.meta.group_name)
            && equals(&filters.source_name, &self.meta.source_name)
            && equals(&filters.authors, &self.meta.authors)
    }

    fn into_hit(self, score: f32, granularity: Granularity) -> RawHit {
        RawHit {
            id: self.id,
            score,
            text: self.text,
            quality_ratio: self.quality_ratio,
            source_id: match granularity {
                Granularity::Document => None,
                Granularity::Sentence => Some(self.source_id),
            },
            highlights: None,
            meta: self.meta,
        }
    }
}

/// Scores a candidate; `None` when it does not match
enum Scorer {
    Lexical(LexicalMatcher),
    Regex { re: regex::Regex, folded: bool },
    Vector(Vec<f32>),
}

impl Scorer {
    fn new(ir: &QueryIr) -> Result<Self> {
        match ir {
            QueryIr::Lexical(lexical) => Ok(Scorer::Lexical(LexicalMatcher::new(lexical)?)),
            QueryIr::Regex { pattern, field } => {
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| LaanaError::InvalidQuery(format!("Invalid regex: {}", e)))?;
                Ok(Scorer::Regex {
                    re,
                    folded: field.is_folded(),
                })
            }
            QueryIr::Vector(vector) => Ok(Scorer::Vector(vector.vector.clone())),
            QueryIr::Hybrid { .. } => Err(LaanaError::InvalidQuery(
                "hybrid queries are split before reaching the embedded store".to_string(),
            )),
        }
    }

    fn score(&self, row: &CandidateRow) -> Option<f32> {
        match self {
            Scorer::Lexical(matcher) => {
                let score = matcher.score(&row.text);
                (score > 0.0).then_some(score)
            }
            Scorer::Regex { re, folded } => {
                let matched = if *folded {
                    re.is_match(&fold_diacritics(&row.text))
                } else {
                    re.is_match(&row.text)
                };
                matched.then_some(1.0)
            }
            Scorer::Vector(query) => match &row.vector {
                Some(v) if v.len() == query.len() => Some(cosine_similarity(query, v)),
                Some(v) => {
                    warn!("Stored vector for {} has {} dimensions; ignored", row.id, v.len());
                    None
                }
                None => None,
            },
        }
    }
}

/// SQLite-backed corpus
#[derive(Clone)]
pub struct SqliteCorpus {
    db: Arc<Database>,
}

impl SqliteCorpus {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Insert or update a document; a changed text drops its stale vectors
    pub fn upsert_document(&self, conn: &rusqlite::Connection, doc: &Document) -> Result<()> {
        conn.execute(
            "INSERT INTO documents (source_id, text, group_name, source_name, authors, date, quality_ratio)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source_id) DO UPDATE SET
                group_name = excluded.group_name,
                source_name = excluded.source_name,
                authors = excluded.authors,
                date = excluded.date,
                quality_ratio = excluded.quality_ratio,
                vector_small = CASE WHEN documents.text = excluded.text THEN documents.vector_small END,
                vector_large = CASE WHEN documents.text = excluded.text THEN documents.vector_large END,
                text = excluded.text",
            params![
                doc.source_id,
                doc.text,
                doc.group_name,
                doc.source_name,
                doc.authors,
                doc.date,
                doc.quality_ratio.map(f64::from)
            ],
        )?;
        Ok(())
    }

    /// Insert or update a sentence; a negative id lets SQLite assign one
    pub fn upsert_sentence(&self, conn: &rusqlite::Connection, sentence: &Sentence) -> Result<()> {
        let id = (sentence.sentence_id >= 0).then_some(sentence.sentence_id);
        conn.execute(
            "INSERT INTO sentences (sentence_id, source_id, position, text, quality_ratio)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(sentence_id) DO UPDATE SET
                source_id = excluded.source_id,
                position = excluded.position,
                quality_ratio = excluded.quality_ratio,
                vector_small = CASE WHEN sentences.text = excluded.text THEN sentences.vector_small END,
                vector_large = CASE WHEN sentences.text = excluded.text THEN sentences.vector_large END,
                text = excluded.text",
            params![
                id,
                sentence.source_id,
                sentence.position,
                sentence.text,
                sentence.quality_ratio.map(f64::from)
            ],
        )?;
        Ok(())
    }

    /// The stored vector of one entity, if any
    pub fn vector(&self, field: VectorField, id: EntityId) -> Result<Option<Vec<f32>>> {
        let (table, id_column) = table(field.entity);
        let conn = self.db.get_conn()?;
        let blob: Option<Option<Vec<u8>>> = conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE {} = ?1", field.column(), table, id_column),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.flatten().map(|b| decode_blob(&b)))
    }

    fn candidates(&self, query: &BuiltQuery) -> Result<Vec<CandidateRow>> {
        let vector_column = query.ir.vector_query().map(|v| v.field.column());
        let sql = match query.spec.granularity {
            Granularity::Document => format!(
                "SELECT source_id, source_id, text, quality_ratio, group_name, source_name, authors, date, {}
                 FROM documents ORDER BY source_id",
                vector_column.unwrap_or("NULL")
            ),
            Granularity::Sentence => format!(
                "SELECT s.sentence_id, s.source_id, s.text, s.quality_ratio,
                        d.group_name, d.source_name, d.authors, d.date, {}
                 FROM sentences s JOIN documents d ON d.source_id = s.source_id
                 ORDER BY s.sentence_id",
                vector_column.map_or("NULL".to_string(), |c| format!("s.{}", c))
            ),
        };

        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], CandidateRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().filter(|r| r.passes(&query.filters)).collect())
    }

    /// Every matching entity, scored and boosted, in no particular order
    fn matches(&self, query: &BuiltQuery) -> Result<Vec<RawHit>> {
        let scorer = Scorer::new(&query.ir)?;
        let mut hits = Vec::new();
        for row in self.candidates(query)? {
            if let Some(mut score) = scorer.score(&row) {
                if let Some(boost) = &query.boost {
                    score *= boost.factor(row.quality_ratio);
                }
                hits.push(row.into_hit(score, query.spec.granularity));
            }
        }
        Ok(hits)
    }

    fn evaluate(&self, query: &BuiltQuery) -> Result<HitPage> {
        let mut hits = self.matches(query)?;
        let total = hits.len() as u64;

        sort_hits(&mut hits, &query.ordering);
        if let Some(vector) = query.ir.vector_query() {
            hits.truncate(vector.k);
        }
        let mut page: Vec<RawHit> = hits.into_iter().skip(query.offset).take(query.k).collect();

        if let Some(directive) = &query.highlight {
            let highlighter = Highlighter::new(directive, &query.ir)?;
            for hit in page.iter_mut() {
                hit.highlights = highlighter.fragments(&hit.text);
            }
        }

        debug!("Embedded {} query matched {} entities", query.spec, total);
        Ok(HitPage {
            hits: page,
            total: Some(total),
        })
    }

    fn native(query: &RenderedQuery) -> Result<&BuiltQuery> {
        match query {
            RenderedQuery::Native(built) => Ok(built),
            _ => Err(LaanaError::InvalidQuery(
                "embedded store executes native queries only".to_string(),
            )),
        }
    }
}

fn sort_hits(hits: &mut [RawHit], ordering: &Ordering) {
    match ordering {
        Ordering::Relevance => order_by_relevance(hits),
        Ordering::Random { seed } => {
            let seed = seed.unwrap_or_else(|| chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64);
            hits.sort_by_key(|h| {
                let mut hasher = DefaultHasher::new();
                (seed, h.id).hash(&mut hasher);
                (hasher.finish(), h.id)
            });
        }
        Ordering::Field { field, descending } => {
            hits.sort_by(|a, b| {
                let ord = match field {
                    SortField::Length => a.text.chars().count().cmp(&b.text.chars().count()),
                    SortField::Text => a.text.cmp(&b.text),
                    SortField::Date => nulls_last(&a.meta.date, &b.meta.date, *descending),
                    SortField::Authors => nulls_last(&a.meta.authors, &b.meta.authors, *descending),
                    SortField::SourceName => nulls_last(&a.meta.source_name, &b.meta.source_name, *descending),
                    SortField::GroupName => nulls_last(&a.meta.group_name, &b.meta.group_name, *descending),
                };
                let ord = match (field, descending) {
                    (SortField::Length | SortField::Text, true) => ord.reverse(),
                    _ => ord,
                };
                ord.then_with(|| a.id.cmp(&b.id))
            });
        }
    }
}

/// Compare optional values in the requested direction, with missing values last either way
fn nulls_last(a: &Option<String>, b: &Option<String>, descending: bool) -> CmpOrdering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(a),
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

impl SqliteCorpus {
    /// Run SQLite work on the blocking pool
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&SqliteCorpus) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let corpus = self.clone();
        tokio::task::spawn_blocking(move || work(&corpus))
            .await
            .map_err(|e| LaanaError::Store(format!("SQLite task failed: {}", e)))?
    }

    fn metadata_for(&self, ids: &[EntityId]) -> Result<AHashMap<EntityId, DocumentMeta>> {
        if ids.is_empty() {
            return Ok(AHashMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT source_id, group_name, source_name, authors, date FROM documents WHERE source_id IN ({})",
            placeholders
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((
                row.get::<_, EntityId>(0)?,
                DocumentMeta {
                    group_name: row.get(1)?,
                    source_name: row.get(2)?,
                    authors: row.get(3)?,
                    date: row.get(4)?,
                },
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<AHashMap<_, _>>>()?)
    }

    fn missing_after(&self, field: VectorField, after: Option<EntityId>, limit: usize) -> Result<Vec<CorpusEntity>> {
        let (table, id_column) = table(field.entity);
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {id}, text FROM {table} WHERE {col} IS NULL AND {id} > ?1 ORDER BY {id} LIMIT ?2",
            id = id_column,
            table = table,
            col = field.column()
        ))?;
        let rows = stmt.query_map(params![after.unwrap_or(i64::MIN), limit as i64], |row| {
            Ok(CorpusEntity::new(row.get(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn by_id(&self, entity: EntityKind, id: EntityId) -> Result<Option<CorpusEntity>> {
        let (table, id_column) = table(entity);
        let conn = self.db.get_conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {id}, text FROM {table} WHERE {id} = ?1", id = id_column, table = table),
                params![id],
                |row| Ok(CorpusEntity::new(row.get(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?)
    }

    /// Apply the updates inside `BEGIN IMMEDIATE` and hand back the undecided transaction
    fn begin_write(&self, field: VectorField, updates: &[VectorUpdate]) -> Result<SqliteTransaction> {
        let (table, id_column) = table(field.entity);
        let conn = self.db.get_conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let mut tx = SqliteTransaction {
            conn: None,
            result: BulkWriteResult::default(),
        };

        {
            let sql = format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", table, field.column(), id_column);
            let prepared = conn.prepare_cached(&sql);
            let mut stmt = match prepared {
                Ok(stmt) => stmt,
                Err(e) => {
                    conn.execute_batch("ROLLBACK")?;
                    return Err(e.into());
                }
            };
            for update in updates {
                let outcome = match stmt.execute(params![encode_blob(update.vector()), update.entity_id()]) {
                    Ok(1) => ItemOutcome::Applied,
                    // The row went away since it was fetched
                    Ok(0) => ItemOutcome::VersionConflict,
                    Ok(n) => ItemOutcome::ValidationError(format!("{} rows matched", n)),
                    Err(e) => ItemOutcome::TransportError(e.to_string()),
                };
                tx.result.items.push(ItemResult::new(update.entity_id(), outcome));
            }
        }

        tx.conn = Some(conn);
        Ok(tx)
    }
}

#[async_trait]
impl SearchExecutor for SqliteCorpus {
    fn backend(&self) -> Backend {
        Backend::Embedded
    }

    async fn execute(&self, query: &RenderedQuery) -> Result<HitPage> {
        let built = Self::native(query)?.clone();
        self.blocking(move |corpus| corpus.evaluate(&built)).await
    }

    async fn count(&self, query: &RenderedQuery) -> Result<u64> {
        let built = Self::native(query)?.clone();
        self.blocking(move |corpus| Ok(corpus.matches(&built)?.len() as u64)).await
    }

    async fn document_metadata(&self, ids: &[EntityId]) -> Result<AHashMap<EntityId, DocumentMeta>> {
        let ids = ids.to_vec();
        self.blocking(move |corpus| corpus.metadata_for(&ids)).await
    }
}

#[async_trait]
impl KeysetSource for SqliteCorpus {
    async fn fetch_missing_after(
        &self,
        field: VectorField,
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<CorpusEntity>> {
        self.blocking(move |corpus| corpus.missing_after(field, after, limit)).await
    }

    async fn fetch_by_id(&self, entity: EntityKind, id: EntityId) -> Result<Option<CorpusEntity>> {
        self.blocking(move |corpus| corpus.by_id(entity, id)).await
    }
}

/// An open `BEGIN IMMEDIATE` transaction on a pooled connection; rolled back if dropped undecided
struct SqliteTransaction {
    conn: Option<PooledConnection<SqliteConnectionManager>>,
    result: BulkWriteResult,
}

impl SqliteTransaction {
    /// Run `COMMIT` or `ROLLBACK`; the connection only goes back to the pool outside a transaction
    fn finish(&mut self, statement: &str) -> Result<()> {
        let outcome = match &self.conn {
            Some(conn) => conn.execute_batch(statement),
            None => return Ok(()),
        };
        if let (Err(e), Some(conn)) = (&outcome, &self.conn) {
            // A failed COMMIT leaves the transaction open
            if !conn.is_autocommit() {
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    warn!("Rollback after failed {} also failed: {}", statement, rollback);
                }
            }
            debug!("{} failed: {}", statement, e);
        }
        self.conn = None;
        Ok(outcome?)
    }

    async fn finish_blocking(mut self: Box<Self>, statement: &'static str) -> Result<()> {
        tokio::task::spawn_blocking(move || self.finish(statement))
            .await
            .map_err(|e| LaanaError::Store(format!("SQLite task failed: {}", e)))?
    }
}

#[async_trait]
impl PendingTransaction for SqliteTransaction {
    fn result(&self) -> &BulkWriteResult {
        &self.result
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish_blocking("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish_blocking("ROLLBACK").await
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Err(e) = self.finish("ROLLBACK") {
            warn!("Rollback of abandoned transaction failed: {}", e);
        }
    }
}

#[async_trait]
impl BulkWriter for SqliteCorpus {
    async fn submit(&self, field: VectorField, updates: &[VectorUpdate]) -> Result<Submission> {
        let updates = updates.to_vec();
        let tx = self.blocking(move |corpus| corpus.begin_write(field, &updates)).await?;
        Ok(Submission::Pending(Box::new(tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{BuilderSettings, QueryBuilder, SearchOptions};
    use crate::vector::ModelTier;
    use std::time::Duration;
    use tempfile::TempDir;

    fn corpus(temp: &TempDir) -> SqliteCorpus {
        let db = Arc::new(Database::new(&temp.path().join("corpus.db")).unwrap());
        let corpus = SqliteCorpus::new(db);
        let conn = corpus.database().get_conn().unwrap();
        for (id, text, ratio) in [
            (1, "aloha mai kakou", 0.9),
            (2, "mai aloha kakou", 0.9),
            (3, "aloha nui loa mai", 0.5),
            (4, "aloha kekahi a me ka mai", 0.5),
        ] {
            corpus
                .upsert_document(
                    &conn,
                    &Document {
                        source_id: id,
                        text: text.to_string(),
                        group_name: Some("nupepa".to_string()),
                        source_name: Some(format!("source {}", id)),
                        authors: None,
                        date: Some(format!("18{}0-01-01", 5 + id)),
                        quality_ratio: Some(ratio),
                    },
                )
                .unwrap();
        }
        corpus
    }

    async fn ids(corpus: &SqliteCorpus, mode: &str, text: &str, options: SearchOptions) -> Vec<EntityId> {
        let built = QueryBuilder::without_embeddings(BuilderSettings::default())
            .build(mode, text, &options)
            .await
            .unwrap();
        let page = corpus
            .execute(&RenderedQuery::Native(Box::new(built)))
            .await
            .unwrap();
        let mut ids: Vec<EntityId> = page.hits.iter().map(|h| h.id).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_phrase_and_near() {
        let temp = TempDir::new().unwrap();
        let corpus = corpus(&temp);
        assert_eq!(ids(&corpus, "phrase", "aloha mai", SearchOptions::default()).await, vec![1]);
        // window 2 allows one token between; doc 3 has two, doc 4 has four
        assert_eq!(ids(&corpus, "near", "aloha mai", SearchOptions::default()).await, vec![1]);
        let wide = SearchOptions {
            near_window: Some(3),
            ..SearchOptions::default()
        };
        assert_eq!(ids(&corpus, "near", "aloha mai", wide).await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_filters_and_highlight() {
        let temp = TempDir::new().unwrap();
        let corpus = corpus(&temp);
        let options = SearchOptions {
            highlight: true,
            filters: Filters {
                date_from: Some(1870),
                ..Filters::default()
            },
            ..SearchOptions::default()
        };
        let built = QueryBuilder::without_embeddings(BuilderSettings::default())
            .build("any", "loa", &options)
            .await
            .unwrap();
        let page = corpus.execute(&RenderedQuery::Native(Box::new(built))).await.unwrap();
        assert_eq!(page.total, Some(1));
        let fragments = page.hits[0].highlights.as_ref().unwrap();
        assert!(fragments[0].contains("__START_HIGHLIGHT__loa__END_HIGHLIGHT__"));
    }

    #[tokio::test]
    async fn test_keyset_and_transactional_write() {
        let temp = TempDir::new().unwrap();
        let corpus = corpus(&temp);
        let field = VectorField::new(EntityKind::Document, ModelTier::Small);

        let missing = corpus.fetch_missing_after(field, Some(1), 10).await.unwrap();
        assert_eq!(missing.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3, 4]);

        let updates: Vec<VectorUpdate> = [2, 3, 99]
            .into_iter()
            .map(|id| VectorUpdate::new(id, vec![0.5; 384], ModelTier::Small).unwrap())
            .collect();
        let outcome = crate::backfill::write_batch(&corpus, field, &updates).await;
        assert!(outcome.rolled_back);
        assert_eq!(corpus.vector(field, 2).unwrap(), None);

        let outcome = crate::backfill::write_batch(&corpus, field, &updates[..2]).await;
        assert_eq!(outcome.written, vec![2, 3]);
        assert_eq!(corpus.vector(field, 3).unwrap(), Some(vec![0.5; 384]));
        assert_eq!(corpus.fetch_missing_after(field, None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_commit_returns_a_clean_connection() {
        let temp = TempDir::new().unwrap();
        let corpus = corpus(&temp);
        let conn = corpus.database().get_conn().unwrap();
        // a deferred foreign key violation makes COMMIT fail and keeps the transaction open
        conn.execute_batch(
            "BEGIN IMMEDIATE;
             PRAGMA defer_foreign_keys = ON;
             INSERT INTO sentences (sentence_id, source_id, text) VALUES (50, 99, 'orphan');",
        )
        .unwrap();
        let tx = Box::new(SqliteTransaction {
            conn: Some(conn),
            result: BulkWriteResult::default(),
        });
        assert!(tx.commit().await.is_err());

        {
            let conn = corpus.database().get_conn().unwrap();
            assert!(conn.is_autocommit());
            let orphans: i64 = conn
                .query_row("SELECT COUNT(*) FROM sentences WHERE sentence_id = 50", [], |row| row.get(0))
                .unwrap();
            assert_eq!(orphans, 0);
        }

        let field = VectorField::new(EntityKind::Document, ModelTier::Small);
        let update = VectorUpdate::new(1, vec![0.25; 384], ModelTier::Small).unwrap();
        let outcome = crate::backfill::write_batch(&corpus, field, &[update]).await;
        assert_eq!(outcome.written, vec![1]);
        assert_eq!(corpus.vector(field, 1).unwrap(), Some(vec![0.25; 384]));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_write_waiting_on_a_lock_leaves_the_runtime_free() {
        let temp = TempDir::new().unwrap();
        let corpus = corpus(&temp);
        let field = VectorField::new(EntityKind::Document, ModelTier::Small);

        let holder = corpus.database().get_conn().unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();

        let writer = corpus.clone();
        let update = VectorUpdate::new(2, vec![0.5; 384], ModelTier::Small).unwrap();
        let write = tokio::spawn(async move { crate::backfill::write_batch(&writer, field, &[update]).await });

        // the single runtime thread must still run this task while the write waits on the lock
        tokio::time::sleep(Duration::from_millis(100)).await;
        holder.execute_batch("COMMIT").unwrap();
        drop(holder);

        let outcome = write.await.unwrap();
        assert_eq!(outcome.written, vec![2]);
    }

    #[tokio::test]
    async fn test_changed_text_drops_vectors() {
        let temp = TempDir::new().unwrap();
        let corpus = corpus(&temp);
        let field = VectorField::new(EntityKind::Document, ModelTier::Small);
        let update = VectorUpdate::new(1, vec![0.1; 384], ModelTier::Small).unwrap();
        crate::backfill::write_batch(&corpus, field, &[update]).await;

        let conn = corpus.database().get_conn().unwrap();
        let mut doc = Document {
            source_id: 1,
            text: "aloha mai kakou".to_string(),
            group_name: None,
            source_name: None,
            authors: None,
            date: None,
            quality_ratio: None,
        };
        corpus.upsert_document(&conn, &doc).unwrap();
        assert!(corpus.vector(field, 1).unwrap().is_some());

        doc.text = "aloha ahiahi".to_string();
        corpus.upsert_document(&conn, &doc).unwrap();
        assert!(corpus.vector(field, 1).unwrap().is_none());
    }
}
