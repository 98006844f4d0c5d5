/// In-process evaluation of lexical queries
use super::ir::{Constraint, LexicalQuery};
use crate::corpus::{fold_diacritics, tokenize, Token};
use crate::error::{LaanaError, Result};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Byte range of a match in the original text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

/// A lexical query prepared for repeated evaluation
pub struct LexicalMatcher {
    terms: Vec<String>,
    constraint: Constraint,
    folded: bool,
    exact: Option<Regex>,
}

impl LexicalMatcher {
    pub fn new(query: &LexicalQuery) -> Result<Self> {
        let exact = match query.constraint {
            Constraint::Exact => Some(exact_regex(&query.raw)?),
            _ => None,
        };

        Ok(Self {
            terms: query.terms.clone(),
            constraint: query.constraint,
            folded: query.field.is_folded(),
            exact,
        })
    }

    fn tokens(&self, text: &str) -> Vec<Token> {
        let mut tokens = tokenize(text);
        if self.folded {
            for token in tokens.iter_mut() {
                token.text = fold_diacritics(&token.text);
            }
        }
        tokens
    }

    /// Spans of every match; empty when the text does not satisfy the query
    pub fn find(&self, text: &str) -> Vec<MatchSpan> {
        if self.terms.is_empty() {
            return Vec::new();
        }

        if let Some(re) = &self.exact {
            if !self.folded {
                return re
                    .find_iter(text)
                    .map(|m| MatchSpan {
                        start: m.start(),
                        end: m.end(),
                    })
                    .collect();
            }
            let (folded, origin) = fold_with_offsets(text);
            return re
                .find_iter(&folded)
                .map(|m| MatchSpan {
                    start: origin[m.start()],
                    end: origin[m.end()],
                })
                .collect();
        }

        let tokens = self.tokens(text);
        match self.constraint {
            Constraint::Any | Constraint::Match => self.any(&tokens),
            Constraint::All => self.all(&tokens),
            Constraint::Term | Constraint::Phrase => self.sequence(&tokens, 1),
            Constraint::Near { window } => self.sequence(&tokens, window.max(1)),
            Constraint::Exact => Vec::new(),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        !self.find(text).is_empty()
    }

    /// Term-frequency relevance, damped by text length; zero when unmatched
    pub fn score(&self, text: &str) -> f32 {
        let spans = self.find(text);
        if spans.is_empty() {
            return 0.0;
        }
        let length = tokenize(text).len().max(1) as f32;
        spans.len() as f32 / (1.0 + length.ln())
    }

    fn any(&self, tokens: &[Token]) -> Vec<MatchSpan> {
        tokens
            .iter()
            .filter(|t| self.terms.iter().any(|term| term == &t.text))
            .map(span_of)
            .collect()
    }

    fn all(&self, tokens: &[Token]) -> Vec<MatchSpan> {
        let every_term_present = self
            .terms
            .iter()
            .all(|term| tokens.iter().any(|t| &t.text == term));
        if every_term_present {
            self.any(tokens)
        } else {
            Vec::new()
        }
    }

    /// Occurrences of the terms in order, each within `window` positions of
    /// the previous one. A window of 1 means contiguous.
    fn sequence(&self, tokens: &[Token], window: usize) -> Vec<MatchSpan> {
        let mut spans = Vec::new();
        for start in 0..tokens.len() {
            if tokens[start].text != self.terms[0] {
                continue;
            }
            if let Some(end) = self.chain(tokens, start, 1, window) {
                spans.push(MatchSpan {
                    start: tokens[start].start,
                    end: tokens[end].end,
                });
            }
        }
        spans
    }

    fn chain(&self, tokens: &[Token], at: usize, term: usize, window: usize) -> Option<usize> {
        if term == self.terms.len() {
            return Some(at);
        }
        let last = (at + window).min(tokens.len() - 1);
        (at + 1..=last)
            .filter(|&next| tokens[next].text == self.terms[term])
            .find_map(|next| self.chain(tokens, next, term + 1, window))
    }
}

fn span_of(token: &Token) -> MatchSpan {
    MatchSpan {
        start: token.start,
        end: token.end,
    }
}

/// Case-insensitive pattern for the query words, separated by any whitespace,
/// anchored on word boundaries
fn exact_regex(raw: &str) -> Result<Regex> {
    let words: Vec<String> = raw.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return Err(LaanaError::InvalidQuery("Empty query".to_string()));
    }
    let pattern = format!(r"\b{}\b", words.join(r"\s+"));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| LaanaError::InvalidQuery(e.to_string()))
}

/// Fold diacritics and map every byte of the folded text back to its
/// offset in the original. Removed characters attach to the next kept one.
fn fold_with_offsets(text: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len() + 1);
    let mut pending: Option<usize> = None;

    for (offset, c) in text.char_indices() {
        let mut buf = [0; 4];
        let replaced = fold_diacritics(c.encode_utf8(&mut buf));
        if replaced.is_empty() {
            pending.get_or_insert(offset);
            continue;
        }
        let from = pending.take().unwrap_or(offset);
        for _ in 0..replaced.len() {
            origin.push(from);
        }
        folded.push_str(&replaced);
    }
    origin.push(text.len());

    (folded, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ir::TextField;

    fn query(text: &str, constraint: Constraint) -> LexicalQuery {
        LexicalQuery {
            terms: tokenize(text).into_iter().map(|t| t.text).collect(),
            raw: text.to_string(),
            constraint,
            field: TextField::Text,
        }
    }

    fn matcher(text: &str, constraint: Constraint) -> LexicalMatcher {
        LexicalMatcher::new(&query(text, constraint)).unwrap()
    }

    #[test]
    fn test_phrase_requires_contiguous_order() {
        let m = matcher("aloha mai", Constraint::Phrase);
        assert!(m.is_match("aloha mai kakou"));
        assert!(!m.is_match("mai aloha kakou"));
        assert!(!m.is_match("aloha e mai"));
    }

    #[test]
    fn test_near_window() {
        let m = matcher("aloha mai", Constraint::Near { window: 2 });
        assert!(m.is_match("aloha mai"));
        assert!(m.is_match("aloha nui mai"));
        assert!(!m.is_match("aloha nui loa no mai"));
        // Order is significant
        assert!(!m.is_match("mai nui aloha"));
    }

    #[test]
    fn test_near_chain_of_three() {
        let m = matcher("ua mau ke", Constraint::Near { window: 2 });
        assert!(m.is_match("ua mau ke ea"));
        assert!(m.is_match("ua x mau x ke"));
        assert!(!m.is_match("ua x x mau ke"));
    }

    #[test]
    fn test_any_and_all() {
        let any = matcher("wai kai", Constraint::Any);
        assert!(any.is_match("ka wai"));
        assert!(!any.is_match("ka lani"));

        let all = matcher("wai kai", Constraint::All);
        assert!(all.is_match("kai a me wai"));
        assert!(!all.is_match("ka wai"));
    }

    #[test]
    fn test_exact_word_boundaries() {
        let m = matcher("Aloha Mai", Constraint::Exact);
        let spans = m.find("He aloha  mai kēia.");
        assert_eq!(spans, vec![MatchSpan { start: 3, end: 13 }]);
        assert!(!m.is_match("alohamai"));
        assert!(!m.is_match("aloha maika"));
    }

    #[test]
    fn test_term_is_whole_token() {
        let m = matcher("wai", Constraint::Term);
        assert!(m.is_match("ka wai"));
        assert!(!m.is_match("waiwai"));
    }

    #[test]
    fn test_folded_matching() {
        let q = LexicalQuery {
            terms: vec!["olelo".to_string()],
            raw: "olelo".to_string(),
            constraint: Constraint::Any,
            field: TextField::Folded,
        };
        let m = LexicalMatcher::new(&q).unwrap();
        let text = "ka ʻōlelo";
        let spans = m.find(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(&text[spans[0].start..spans[0].end], "ʻōlelo");
    }

    #[test]
    fn test_folded_exact_spans_map_to_original() {
        let q = LexicalQuery {
            terms: vec!["kane".to_string()],
            raw: "kane".to_string(),
            constraint: Constraint::Exact,
            field: TextField::Folded,
        };
        let m = LexicalMatcher::new(&q).unwrap();
        let text = "he kāne";
        let spans = m.find(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(&text[spans[0].start..spans[0].end], "kāne");
    }

    #[test]
    fn test_score_zero_when_unmatched() {
        let m = matcher("wai", Constraint::Match);
        assert_eq!(m.score("ka lani"), 0.0);
        assert!(m.score("wai wai") > m.score("wai"));
    }
}
