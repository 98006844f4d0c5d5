/// Target-language vocabulary ratio used as the quality boost
use crate::corpus::text::fold_diacritics;
use crate::error::{LaanaError, Result};
use ahash::AHashSet;
use std::path::Path;

/// Computes the fraction of a text's words that belong to a vocabulary
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    vocabulary: AHashSet<String>,
}

impl QualityScorer {
    /// Build from an iterator of words; entries are case and diacritic folded
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let vocabulary = words
            .into_iter()
            .map(|w| normalize_word(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        Self { vocabulary }
    }

    /// Load a word list: one or more words per line, separated by commas or spaces.
    /// The single letters `a` and `i` are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LaanaError::Io {
            source: e,
            context: format!("Failed to read vocabulary file: {}", path.display()),
        })?;

        let words = content
            .lines()
            .flat_map(|line| line.split([',', ' ']))
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .filter(|w| !w.eq_ignore_ascii_case("a") && !w.eq_ignore_ascii_case("i"));

        let scorer = Self::new(words);
        tracing::info!(
            "Loaded {} vocabulary words from {}",
            scorer.len(),
            path.display()
        );
        Ok(scorer)
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// Ratio in [0, 1]; 0 for text without words
    pub fn ratio(&self, text: &str) -> f32 {
        let mut total = 0usize;
        let mut known = 0usize;
        for word in text.split_whitespace() {
            total += 1;
            if self.vocabulary.contains(&normalize_word(word)) {
                known += 1;
            }
        }
        if total == 0 {
            0.0
        } else {
            known as f32 / total as f32
        }
    }
}

fn normalize_word(word: &str) -> String {
    let trimmed = word.trim_matches(|c: char| c.is_ascii_punctuation() || c == '“' || c == '”');
    fold_diacritics(trimmed).to_lowercase()
}
