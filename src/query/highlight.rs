//! Highlight directives and in-process fragment rendering
//!
//! A directive travels with the built query. Document-store backends render
//! it into a `highlight` clause; the embedded backend evaluates it here. A
//! returned fragment wraps every matched substring in the marker pair, and a
//! text with no match yields no highlight at all.

use super::ir::{Constraint, LexicalQuery, QueryIr, TextField};
use super::matcher::{LexicalMatcher, MatchSpan};
use super::mode::{Granularity, ModeSpec};
use crate::config::HighlightConfig;
use crate::corpus::fold_diacritics;
use crate::error::Result;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// What to highlight
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum HighlightSource {
    /// Whatever the query itself matched
    Query,
    /// Any of these literal terms, e.g. words pulled out of a regex
    Terms { terms: Vec<String> },
    /// A plain match on the query text, for vector searches
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightDirective {
    pub field: TextField,
    pub source: HighlightSource,
    pub fragment_size: usize,
    pub fragments: usize,
    pub pre_tag: String,
    pub post_tag: String,
}

impl HighlightDirective {
    /// Directive for a query of the given mode; `None` when there is nothing to match on
    pub fn for_query(
        spec: ModeSpec,
        ir: &QueryIr,
        text: &str,
        field: TextField,
        config: &HighlightConfig,
    ) -> Option<Self> {
        let source = match ir {
            QueryIr::Lexical(_) => HighlightSource::Query,
            QueryIr::Hybrid { lexical, .. } => HighlightSource::Text {
                text: lexical.raw.clone(),
            },
            QueryIr::Regex { pattern, .. } => HighlightSource::Terms {
                terms: extract_regex_terms(pattern),
            },
            QueryIr::Vector(_) => {
                if text.trim().is_empty() {
                    return None;
                }
                HighlightSource::Text {
                    text: text.to_string(),
                }
            }
        };

        let (fragment_size, fragments) = match spec.granularity {
            Granularity::Document => (config.document_fragment_size, config.document_fragments),
            Granularity::Sentence => (config.sentence_fragment_size, config.sentence_fragments),
        };

        Some(Self {
            field,
            source,
            fragment_size,
            fragments,
            pre_tag: config.start_marker.clone(),
            post_tag: config.end_marker.clone(),
        })
    }
}

fn is_term_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || "āēīōūĀĒĪŌŪ".contains(c)
}

/// Literal words of at least three letters in a regex, lowercased, in order of first appearance
pub fn extract_regex_terms(pattern: &str) -> Vec<String> {
    let mut cleaned = pattern.to_string();
    for meta in [".*", ".+", "^", "$", "\\b", "\\s", "+", "*", "?"] {
        cleaned = cleaned.replace(meta, " ");
    }

    let mut terms: Vec<String> = Vec::new();
    for run in cleaned.split(|c: char| !is_term_letter(c)) {
        if run.chars().count() < 3 {
            continue;
        }
        let term = run.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Evaluates a directive against stored text
pub struct Highlighter {
    directive: HighlightDirective,
    matcher: Option<LexicalMatcher>,
    pattern: Option<Regex>,
}

impl Highlighter {
    pub fn new(directive: &HighlightDirective, ir: &QueryIr) -> Result<Self> {
        let folded = directive.field.is_folded();
        let terms_query = |terms: Vec<String>, raw: String| LexicalQuery {
            terms,
            raw,
            constraint: Constraint::Any,
            field: if folded { TextField::Folded } else { TextField::Text },
        };

        let (matcher, pattern) = match (&directive.source, ir) {
            (HighlightSource::Query, QueryIr::Lexical(lexical)) => {
                (Some(LexicalMatcher::new(lexical)?), None)
            }
            (HighlightSource::Terms { terms }, QueryIr::Regex { pattern, .. }) if terms.is_empty() => {
                // Nothing literal to anchor on; fall back to the pattern itself
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .ok();
                (None, re)
            }
            (HighlightSource::Terms { terms }, _) => {
                let terms = terms.iter().map(|t| normalize(t, folded)).collect();
                (Some(LexicalMatcher::new(&terms_query(terms, String::new()))?), None)
            }
            (HighlightSource::Text { text }, _) => {
                let terms = crate::corpus::tokenize(text)
                    .into_iter()
                    .map(|t| normalize(&t.text, folded))
                    .collect();
                (Some(LexicalMatcher::new(&terms_query(terms, text.clone()))?), None)
            }
            (HighlightSource::Query, _) => (None, None),
        };

        Ok(Self {
            directive: directive.clone(),
            matcher,
            pattern,
        })
    }

    /// Highlighted fragments, or `None` when nothing in the text matched
    pub fn fragments(&self, text: &str) -> Option<Vec<String>> {
        let spans = if let Some(matcher) = &self.matcher {
            matcher.find(text)
        } else if let Some(re) = &self.pattern {
            re.find_iter(text)
                .filter(|m| !m.is_empty())
                .map(|m| MatchSpan {
                    start: m.start(),
                    end: m.end(),
                })
                .collect()
        } else {
            Vec::new()
        };

        if spans.is_empty() {
            return None;
        }

        Some(render_fragments(
            text,
            spans,
            self.directive.fragment_size,
            self.directive.fragments,
            &self.directive.pre_tag,
            &self.directive.post_tag,
        ))
    }
}

fn normalize(term: &str, folded: bool) -> String {
    let lower = term.to_lowercase();
    if folded {
        fold_diacritics(&lower)
    } else {
        lower
    }
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Cut up to `max_fragments` windows of roughly `fragment_size` bytes around the
/// spans and wrap every span in the markers
pub fn render_fragments(
    text: &str,
    mut spans: Vec<MatchSpan>,
    fragment_size: usize,
    max_fragments: usize,
    pre: &str,
    post: &str,
) -> Vec<String> {
    spans.sort();
    let mut merged: Vec<MatchSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }

    let mut fragments = Vec::new();
    let mut i = 0;
    while i < merged.len() && fragments.len() < max_fragments {
        let first = merged[i];
        let context = fragment_size.saturating_sub(first.end - first.start) / 2;

        let mut start = floor_boundary(text, first.start.saturating_sub(context));
        if start > 0 {
            // Do not cut a word in half
            if let Some(ws) = text[start..first.start].find(char::is_whitespace) {
                start += ws;
                start = ceil_boundary(text, start + 1);
            }
        }
        let mut end = ceil_boundary(text, (start + fragment_size).max(first.end));
        if end < text.len() {
            if let Some(ws) = text[first.end..end].rfind(char::is_whitespace) {
                end = first.end + ws;
            }
        }

        let mut fragment = String::with_capacity(end - start + pre.len() + post.len());
        let mut cursor = start;
        while i < merged.len() && merged[i].end <= end {
            let span = merged[i];
            fragment.push_str(&text[cursor..span.start]);
            fragment.push_str(pre);
            fragment.push_str(&text[span.start..span.end]);
            fragment.push_str(post);
            cursor = span.end;
            i += 1;
        }
        fragment.push_str(&text[cursor..end]);
        fragments.push(fragment.trim().to_string());
    }
    fragments
}
