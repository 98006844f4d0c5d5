/// Query DSL rendering for the document-store family
use super::RenderSettings;
use crate::query::highlight::{HighlightDirective, HighlightSource};
use crate::query::ir::{BuiltQuery, Constraint, LexicalQuery, QualityBoost, QueryIr, TextField, VectorQuery};
use crate::query::mode::{Filters, Granularity, Ordering, SortField};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// A request against one index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DslRequest {
    pub index: String,
    /// `_search` or `_count`
    pub endpoint: String,
    pub body: Value,
}

fn index_for(query: &BuiltQuery, settings: &RenderSettings) -> String {
    match query.spec.granularity {
        Granularity::Document => settings.documents_index.clone(),
        Granularity::Sentence => settings.sentences_index.clone(),
    }
}

fn field_name(field: TextField) -> &'static str {
    match field {
        TextField::Text => "text",
        TextField::Raw => "text.raw",
        TextField::Folded => "text.folded",
    }
}

fn lexical_clause(lexical: &LexicalQuery) -> Value {
    let field = field_name(lexical.field);
    match lexical.constraint {
        Constraint::Any => json!({ "match": { field: { "query": lexical.raw, "operator": "or" } } }),
        Constraint::All => json!({ "match": { field: { "query": lexical.raw, "operator": "and" } } }),
        Constraint::Match => json!({ "match": { field: lexical.raw } }),
        Constraint::Phrase => json!({ "match_phrase": { field: lexical.raw } }),
        Constraint::Exact => json!({ "match_phrase": { field: { "query": lexical.raw, "slop": 0 } } }),
        Constraint::Term if lexical.terms.len() == 1 => {
            json!({ "term": { field: lexical.terms[0] } })
        }
        Constraint::Term => json!({ "match_phrase": { field: lexical.raw } }),
        Constraint::Near { window } => {
            if lexical.terms.len() < 2 {
                return json!({ "match": { field: lexical.raw } });
            }
            let clauses: Vec<Value> = lexical
                .terms
                .iter()
                .map(|t| json!({ "span_term": { field: t } }))
                .collect();
            json!({
                "span_near": {
                    "clauses": clauses,
                    "slop": window.saturating_sub(1),
                    "in_order": true
                }
            })
        }
    }
}

fn regex_clause(pattern: &str, field: TextField) -> Value {
    json!({
        "regexp": {
            field_name(field): {
                "value": pattern,
                "flags": "ALL",
                "case_insensitive": true
            }
        }
    })
}

fn script_score(vector: &VectorQuery) -> Value {
    json!({
        "script_score": {
            "query": { "match_all": {} },
            "script": {
                "source": format!(
                    "cosineSimilarity(params.query_vector, '{}') + 1.0",
                    vector.field.dsl_name()
                ),
                "params": { "query_vector": vector.vector }
            }
        }
    })
}

fn knn_clause(vector: &VectorQuery, filter: Option<Value>) -> Value {
    let mut knn = Map::new();
    knn.insert("field".into(), json!(vector.field.dsl_name()));
    knn.insert("query_vector".into(), json!(vector.vector));
    knn.insert("k".into(), json!(vector.k));
    knn.insert("num_candidates".into(), json!(vector.num_candidates));
    if let Some(boost) = vector.boost {
        knn.insert("boost".into(), json!(boost));
    }
    if let Some(filter) = filter {
        knn.insert("filter".into(), filter);
    }
    Value::Object(knn)
}

fn with_boost(query: Value, boost: &QualityBoost) -> Value {
    json!({
        "function_score": {
            "query": query,
            "functions": [{
                "field_value_factor": {
                    "field": boost.field,
                    "modifier": "ln1p",
                    "factor": 1.0,
                    "missing": boost.missing
                }
            }],
            "boost_mode": "multiply"
        }
    })
}

fn filter_clauses(filters: &Filters) -> Vec<Value> {
    let mut clauses = Vec::new();
    if filters.date_from.is_some() || filters.date_to.is_some() {
        let mut range = Map::new();
        if let Some(from) = filters.date_from {
            range.insert("gte".into(), json!(format!("{:04}-01-01", from)));
        }
        if let Some(to) = filters.date_to {
            range.insert("lte".into(), json!(format!("{:04}-12-31", to)));
        }
        clauses.push(json!({ "range": { "date": range } }));
    }
    for (field, value) in [
        ("groupname.keyword", &filters.group_name),
        ("sourcename.keyword", &filters.source_name),
        ("authors.keyword", &filters.authors),
    ] {
        if let Some(value) = value {
            clauses.push(json!({ "term": { field: value } }));
        }
    }
    clauses
}

fn filtered(query: Value, filters: &[Value]) -> Value {
    if filters.is_empty() {
        return query;
    }
    json!({ "bool": { "must": [query], "filter": filters } })
}

/// The `query` part and, for approximate vector searches, a top-level `knn`
fn core(query: &BuiltQuery, boosted: bool) -> (Option<Value>, Option<Value>) {
    let boost = |q: Value| match (&query.boost, boosted) {
        (Some(b), true) => with_boost(q, b),
        _ => q,
    };
    let filters = filter_clauses(&query.filters);
    let knn_filter = (!filters.is_empty()).then(|| json!({ "bool": { "filter": filters.clone() } }));

    match &query.ir {
        QueryIr::Lexical(lexical) => (Some(filtered(boost(lexical_clause(lexical)), &filters)), None),
        QueryIr::Regex { pattern, field } => {
            (Some(filtered(boost(regex_clause(pattern, *field)), &filters)), None)
        }
        QueryIr::Vector(vector) if vector.exhaustive => (Some(filtered(script_score(vector), &filters)), None),
        QueryIr::Vector(vector) => (None, Some(knn_clause(vector, knn_filter))),
        QueryIr::Hybrid { lexical, vector } if vector.exhaustive => {
            let both = json!({ "bool": { "should": [lexical_clause(lexical), script_score(vector)] } });
            (Some(filtered(both, &filters)), None)
        }
        QueryIr::Hybrid { lexical, vector } => {
            let text = json!({ "bool": { "should": [lexical_clause(lexical)] } });
            (Some(filtered(text, &filters)), Some(knn_clause(vector, knn_filter)))
        }
    }
}

fn sort_field(field: SortField) -> &'static str {
    match field {
        SortField::Date => "date",
        SortField::Authors => "authors.keyword",
        SortField::SourceName => "sourcename.keyword",
        SortField::GroupName => "groupname.keyword",
        SortField::Length => "length",
        SortField::Text => "text.keyword",
    }
}

fn highlight_clause(directive: &HighlightDirective, query: Option<&Value>) -> Value {
    let field = field_name(directive.field);
    let field = if field == "text.raw" { "text" } else { field };
    let mut highlight = Map::new();
    highlight.insert(
        "fields".into(),
        json!({
            field: {
                "fragment_size": directive.fragment_size,
                "number_of_fragments": directive.fragments,
                "pre_tags": [directive.pre_tag],
                "post_tags": [directive.post_tag]
            }
        }),
    );

    let highlight_query = match &directive.source {
        HighlightSource::Query => query.cloned(),
        HighlightSource::Terms { terms } if terms.is_empty() => None,
        HighlightSource::Terms { terms } if terms.len() == 1 => {
            Some(json!({ "match": { field: { "query": terms[0], "fuzziness": 0 } } }))
        }
        HighlightSource::Terms { terms } => {
            let should: Vec<Value> = terms
                .iter()
                .map(|t| json!({ "match": { field: { "query": t, "fuzziness": 0 } } }))
                .collect();
            Some(json!({ "bool": { "should": should, "minimum_should_match": 1 } }))
        }
        HighlightSource::Text { text } => Some(json!({ "match": { field: text } })),
    };
    if let Some(q) = highlight_query {
        highlight.insert("highlight_query".into(), q);
    }
    Value::Object(highlight)
}

pub fn search_request(query: &BuiltQuery, settings: &RenderSettings) -> DslRequest {
    let (mut main, knn) = core(query, true);
    let unboosted = match &query.ir {
        QueryIr::Lexical(l) => Some(lexical_clause(l)),
        _ => None,
    };

    match &query.ordering {
        Ordering::Random { seed } => {
            let seed = seed.unwrap_or_else(|| chrono::Utc::now().timestamp() as u64);
            let inner = main.take().unwrap_or_else(|| json!({ "match_all": {} }));
            main = Some(json!({
                "function_score": {
                    "query": inner,
                    "random_score": { "seed": seed, "field": "_seq_no" },
                    "boost_mode": "replace"
                }
            }));
        }
        Ordering::Relevance | Ordering::Field { .. } => {}
    }

    let mut body = Map::new();
    if let Some(q) = &main {
        body.insert("query".into(), q.clone());
    }
    if let Some(knn) = knn {
        body.insert("knn".into(), knn);
    }
    body.insert("from".into(), json!(query.offset));
    body.insert("size".into(), json!(query.k));
    body.insert("track_total_hits".into(), json!(true));

    if let Ordering::Field { field, descending } = &query.ordering {
        let order = if *descending { "desc" } else { "asc" };
        body.insert("sort".into(), json!([{ sort_field(*field): { "order": order } }]));
    }

    if let Some(directive) = &query.highlight {
        body.insert(
            "highlight".into(),
            highlight_clause(directive, unboosted.as_ref()),
        );
    }

    DslRequest {
        index: index_for(query, settings),
        endpoint: "_search".to_string(),
        body: Value::Object(body),
    }
}

/// Count request; the quality boost does not change membership and is left out
pub fn count_request(query: &BuiltQuery, settings: &RenderSettings) -> DslRequest {
    let (main, _) = core(query, false);
    DslRequest {
        index: index_for(query, settings),
        endpoint: "_count".to_string(),
        body: json!({ "query": main.unwrap_or_else(|| json!({ "match_all": {} })) }),
    }
}
