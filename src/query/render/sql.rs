//! SQL rendering for a relational store with `tsvector` search and a vector extension
//!
//! User text only ever reaches the statement as a bound parameter. The two
//! inlined values are integers (limit, offset) and the fixed-precision vector
//! literal, neither of which can carry quotes.

use super::RenderSettings;
use crate::query::ir::{BuiltQuery, Constraint, LexicalQuery, QueryIr, TextField, VectorQuery};
use crate::query::mode::{Filters, Granularity, Ordering, SortField};
use crate::vector::to_sql_literal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
}

/// A statement with named (`:name`) parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
}

impl SqlStatement {
    pub fn param(&self, name: &str) -> Option<&SqlValue> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

struct Tables<'a> {
    from: String,
    id: &'a str,
    /// Alias carrying the document metadata columns
    meta: &'a str,
}

fn tables<'a>(query: &BuiltQuery, settings: &'a RenderSettings) -> Tables<'a> {
    match query.spec.granularity {
        Granularity::Document => Tables {
            from: format!("{} o", settings.documents_table),
            id: "source_id",
            meta: "o",
        },
        Granularity::Sentence => Tables {
            from: format!(
                "{} o JOIN {} s ON s.source_id = o.source_id",
                settings.sentences_table, settings.documents_table
            ),
            id: "sentence_id",
            meta: "s",
        },
    }
}

fn text_expr(field: TextField) -> &'static str {
    if field.is_folded() {
        "unaccent(o.text)"
    } else {
        "o.text"
    }
}

/// A tsquery lexeme: quoted, with quotes doubled and backslashes escaped
fn lexeme(term: &str) -> String {
    format!("'{}'", term.replace('\\', "\\\\").replace('\'', "''"))
}

/// Most gap combinations a `near` query is expanded into
const NEAR_CHAINS_MAX: usize = 256;

fn tsquery(lexical: &LexicalQuery) -> String {
    let lexemes: Vec<String> = lexical.terms.iter().map(|t| lexeme(t)).collect();
    match lexical.constraint {
        Constraint::Any | Constraint::Match => lexemes.join(" | "),
        Constraint::All => lexemes.join(" & "),
        Constraint::Phrase | Constraint::Term | Constraint::Exact => lexemes.join(" <-> "),
        Constraint::Near { window } => near_tsquery(&lexemes, window),
    }
}

/// Ordered terms, each within `window` positions of the one before
///
/// `<N>` is left-associative and counts from the last lexeme of its left
/// operand, so `a <1> b <2> c` pins one occurrence of `b` for both gaps.
/// Every gap combination becomes one chain. Past `NEAR_CHAINS_MAX` chains
/// the gaps are constrained pairwise instead, which may match different
/// occurrences of a middle term.
fn near_tsquery(lexemes: &[String], window: usize) -> String {
    if lexemes.len() < 2 {
        return lexemes.join("");
    }
    let gaps = (lexemes.len() - 1) as u32;
    match window.checked_pow(gaps) {
        Some(n) if n <= NEAR_CHAINS_MAX => {
            let mut chains = vec![lexemes[0].clone()];
            for next in &lexemes[1..] {
                chains = chains
                    .iter()
                    .flat_map(|chain| (1..=window).map(move |d| format!("{} <{}> {}", chain, d, next)))
                    .collect();
            }
            format!("({})", chains.join(" | "))
        }
        _ => lexemes
            .windows(2)
            .map(|pair| {
                let options: Vec<String> = (1..=window)
                    .map(|d| format!("{} <{}> {}", pair[0], d, pair[1]))
                    .collect();
                format!("({})", options.join(" | "))
            })
            .collect::<Vec<_>>()
            .join(" & "),
    }
}

fn like_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// ILIKE prefilter for an exact query: the words in order, any run of whitespace between them
fn like_pattern(raw: &str) -> String {
    let words: Vec<String> = raw.split_whitespace().map(like_escape).collect();
    format!("%{}%", words.join("%"))
}

fn word_regex(lexical: &LexicalQuery) -> String {
    let words: Vec<String> = lexical.raw.split_whitespace().map(regex::escape).collect();
    format!("\\m{}\\M", words.join("\\s+"))
}

struct Clause {
    condition: String,
    score: String,
}

fn lexical_clause(lexical: &LexicalQuery, params: &mut Vec<(String, SqlValue)>) -> Clause {
    let text = text_expr(lexical.field);
    if lexical.constraint == Constraint::Exact {
        params.push(("term".into(), SqlValue::Text(like_pattern(&lexical.raw))));
        params.push(("regex".into(), SqlValue::Text(word_regex(lexical))));
        return Clause {
            condition: format!("{text} ILIKE :term AND {text} ~* :regex"),
            score: "1.0".to_string(),
        };
    }
    params.push(("term".into(), SqlValue::Text(tsquery(lexical))));
    let vector = format!("to_tsvector('simple', {text})");
    Clause {
        condition: format!("{vector} @@ to_tsquery('simple', :term)"),
        score: format!("ts_rank_cd({vector}, to_tsquery('simple', :term))"),
    }
}

fn vector_score(vector: &VectorQuery) -> String {
    format!(
        "(1 - (o.{} <=> '{}'::vector))",
        vector.field.column(),
        to_sql_literal(&vector.vector)
    )
}

fn core(query: &BuiltQuery, params: &mut Vec<(String, SqlValue)>) -> Clause {
    match &query.ir {
        QueryIr::Lexical(lexical) => lexical_clause(lexical, params),
        QueryIr::Regex { pattern, field } => {
            params.push(("term".into(), SqlValue::Text(pattern.clone())));
            Clause {
                condition: format!("{} ~* :term", text_expr(*field)),
                score: "1.0".to_string(),
            }
        }
        QueryIr::Vector(vector) => Clause {
            condition: format!("o.{} IS NOT NULL", vector.field.column()),
            score: vector_score(vector),
        },
        // Only reached when a caller renders an unsplit hybrid; scores add
        QueryIr::Hybrid { lexical, vector } => {
            let text = lexical_clause(lexical, params);
            Clause {
                condition: format!("({}) OR o.{} IS NOT NULL", text.condition, vector.field.column()),
                score: format!(
                    "{} + CASE WHEN o.{} IS NULL THEN 0 ELSE {} END",
                    text.score,
                    vector.field.column(),
                    vector_score(vector)
                ),
            }
        }
    }
}

fn filter_conditions(filters: &Filters, meta: &str, params: &mut Vec<(String, SqlValue)>) -> Vec<String> {
    let mut conditions = Vec::new();
    if let Some(from) = filters.date_from {
        params.push(("date_from".into(), SqlValue::Text(format!("{:04}-01-01", from))));
        conditions.push(format!("{meta}.date >= :date_from"));
    }
    if let Some(to) = filters.date_to {
        params.push(("date_to".into(), SqlValue::Text(format!("{:04}-12-31", to))));
        conditions.push(format!("{meta}.date <= :date_to"));
    }
    for (column, value) in [
        ("group_name", &filters.group_name),
        ("source_name", &filters.source_name),
        ("authors", &filters.authors),
    ] {
        if let Some(value) = value {
            params.push((column.into(), SqlValue::Text(value.clone())));
            conditions.push(format!("{meta}.{column} = :{column}"));
        }
    }
    conditions
}

fn order_by(query: &BuiltQuery, tables: &Tables<'_>, params: &mut Vec<(String, SqlValue)>) -> String {
    let id = format!("o.{}", tables.id);
    match &query.ordering {
        Ordering::Relevance => match &query.ir {
            QueryIr::Vector(vector) => format!(
                "o.{} <=> '{}'::vector, {id} ASC",
                vector.field.column(),
                to_sql_literal(&vector.vector)
            ),
            _ => format!("score DESC, o.quality_ratio DESC NULLS LAST, {id} ASC"),
        },
        Ordering::Random { seed: Some(seed) } => {
            params.push(("seed".into(), SqlValue::Integer(*seed as i64)));
            format!("md5({id}::text || :seed), {id} ASC")
        }
        Ordering::Random { seed: None } => "random()".to_string(),
        Ordering::Field { field, descending } => {
            let column = match field {
                SortField::Date => format!("{}.date", tables.meta),
                SortField::Authors => format!("{}.authors", tables.meta),
                SortField::SourceName => format!("{}.source_name", tables.meta),
                SortField::GroupName => format!("{}.group_name", tables.meta),
                SortField::Length => "length(o.text)".to_string(),
                SortField::Text => "o.text".to_string(),
            };
            let direction = if *descending { "DESC" } else { "ASC" };
            format!("{column} {direction} NULLS LAST, {id} ASC")
        }
    }
}

fn where_clause(condition: String, filters: Vec<String>) -> String {
    std::iter::once(condition)
        .chain(filters)
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub fn search_statement(query: &BuiltQuery, settings: &RenderSettings) -> SqlStatement {
    let tables = tables(query, settings);
    let mut params = Vec::new();
    let clause = core(query, &mut params);
    let filters = filter_conditions(&query.filters, tables.meta, &mut params);

    let score = match &query.boost {
        Some(_) => format!("({}) * ln(1 + COALESCE(o.quality_ratio, 1.0))", clause.score),
        None => clause.score,
    };
    let source = match query.spec.granularity {
        Granularity::Document => "o.source_id",
        Granularity::Sentence => "o.source_id AS source_id, o.position",
    };
    let m = tables.meta;
    let order = order_by(query, &tables, &mut params);

    let sql = format!(
        "SELECT o.{id} AS id, {source}, o.text, o.quality_ratio, {m}.group_name, {m}.source_name, \
         {m}.authors, {m}.date, {score} AS score FROM {from} WHERE {cond} ORDER BY {order} LIMIT {limit} OFFSET {offset}",
        id = tables.id,
        from = tables.from,
        cond = where_clause(clause.condition, filters),
        limit = query.k,
        offset = query.offset,
    );
    SqlStatement { sql, params }
}

pub fn count_statement(query: &BuiltQuery, settings: &RenderSettings) -> SqlStatement {
    let tables = tables(query, settings);
    let mut params = Vec::new();
    let clause = core(query, &mut params);
    let filters = filter_conditions(&query.filters, tables.meta, &mut params);
    let sql = format!(
        "SELECT count(*) AS count FROM {} WHERE {}",
        tables.from,
        where_clause(clause.condition, filters)
    );
    SqlStatement { sql, params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{BuilderSettings, QueryBuilder, SearchOptions};

    fn lexical(mode: &str, text: &str, options: SearchOptions) -> BuiltQuery {
        let spec = mode.parse().unwrap();
        QueryBuilder::without_embeddings(BuilderSettings::default())
            .build_lexical(spec, text, &options)
            .unwrap()
    }

    fn text(value: Option<&SqlValue>) -> &str {
        match value {
            Some(SqlValue::Text(s)) => s,
            other => panic!("expected text param, got {:?}", other),
        }
    }

    #[test]
    fn test_all_is_conjunction() {
        let stmt = search_statement(&lexical("all", "aloha mai", SearchOptions::default()), &RenderSettings::default());
        assert_eq!(text(stmt.param("term")), "'aloha' & 'mai'");
        assert!(stmt.sql.contains("FROM sources o WHERE"));
        assert!(stmt.sql.contains("ln(1 + COALESCE(o.quality_ratio, 1.0))"));
        assert!(stmt.sql.ends_with("LIMIT 10 OFFSET 0"));
    }

    #[test]
    fn test_phrase_and_near() {
        let phrase = search_statement(&lexical("phrase", "aloha mai", SearchOptions::default()), &RenderSettings::default());
        assert_eq!(text(phrase.param("term")), "'aloha' <-> 'mai'");

        let near = search_statement(&lexical("near", "aloha mai", SearchOptions::default()), &RenderSettings::default());
        assert_eq!(text(near.param("term")), "('aloha' <1> 'mai' | 'aloha' <2> 'mai')");
    }

    #[test]
    fn test_near_chains_share_middle_terms() {
        let near = search_statement(&lexical("near", "ua mau ke", SearchOptions::default()), &RenderSettings::default());
        assert_eq!(
            text(near.param("term")),
            "('ua' <1> 'mau' <1> 'ke' | 'ua' <1> 'mau' <2> 'ke' | 'ua' <2> 'mau' <1> 'ke' | 'ua' <2> 'mau' <2> 'ke')"
        );

        let long = ["a", "b", "c", "d", "e", "f"].map(lexeme);
        let wide = near_tsquery(&long, 4);
        assert!(wide.starts_with("('a' <1> 'b' | 'a' <2> 'b'"));
        assert_eq!(wide.matches(" & ").count(), 4);
    }

    #[test]
    fn test_quotes_stay_in_params() {
        let stmt = search_statement(&lexical("any", "ka'u wai", SearchOptions::default()), &RenderSettings::default());
        assert!(!stmt.sql.contains("ka'u"));
        assert_eq!(text(stmt.param("term")), "'ka''u' | 'wai'");
    }

    #[test]
    fn test_exact_uses_like_and_word_boundaries() {
        let stmt = search_statement(&lexical("exact", "100% pono", SearchOptions::default()), &RenderSettings::default());
        assert_eq!(text(stmt.param("term")), "%100\\%%pono%");
        assert_eq!(text(stmt.param("regex")), "\\m100%\\s+pono\\M");
        assert!(stmt.sql.contains("o.text ILIKE :term AND o.text ~* :regex"));

        let spaced = search_statement(&lexical("exact", " aloha   mai\tkakou ", SearchOptions::default()), &RenderSettings::default());
        assert_eq!(text(spaced.param("term")), "%aloha%mai%kakou%");
        assert_eq!(text(spaced.param("regex")), "\\maloha\\s+mai\\s+kakou\\M");
    }

    #[test]
    fn test_sentence_regex_folded_joins_documents() {
        let options = SearchOptions {
            diacritic_sensitive: false,
            ..SearchOptions::default()
        };
        let stmt = search_statement(&lexical("regexsentence", "kā.*", options), &RenderSettings::default());
        assert!(stmt.sql.contains("FROM sentences o JOIN sources s ON s.source_id = o.source_id"));
        assert!(stmt.sql.contains("unaccent(o.text) ~* :term"));
        assert_eq!(text(stmt.param("term")), "ka.*");
    }

    #[test]
    fn test_filters_bind_params() {
        let options = SearchOptions {
            filters: Filters {
                date_from: Some(1850),
                group_name: Some("nupepa".to_string()),
                ..Filters::default()
            },
            ..SearchOptions::default()
        };
        let stmt = count_statement(&lexical("match", "wai", options), &RenderSettings::default());
        assert!(stmt.sql.starts_with("SELECT count(*)"));
        assert!(stmt.sql.contains("o.date >= :date_from AND o.group_name = :group_name"));
        assert_eq!(text(stmt.param("date_from")), "1850-01-01");
    }

    #[tokio::test]
    async fn test_vector_orders_by_distance() {
        let options = SearchOptions {
            vector: Some(vec![0.5; 1024]),
            ..SearchOptions::default()
        };
        let query = QueryBuilder::without_embeddings(BuilderSettings::default())
            .build("vector", "aloha", &options)
            .await
            .unwrap();
        let stmt = search_statement(&query, &RenderSettings::default());
        assert!(stmt.sql.contains("o.vector_large IS NOT NULL"));
        assert!(stmt.sql.contains("ORDER BY o.vector_large <=> '[0.500000,"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_seeded_random_order() {
        let options = SearchOptions {
            ordering: Ordering::Random { seed: Some(7) },
            ..SearchOptions::default()
        };
        let stmt = search_statement(&lexical("match", "wai", options), &RenderSettings::default());
        assert!(stmt.sql.contains("ORDER BY md5(o.source_id::text || :seed)"));
        assert_eq!(stmt.param("seed"), Some(&SqlValue::Integer(7)));
    }
}
