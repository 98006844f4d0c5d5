/// Tokenizing and diacritic folding for lexical matching
use serde::{Deserialize, Serialize};

/// A word token with its byte span in the source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Lowercased token text
    pub text: String,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// Ordinal position among the tokens of the text
    pub position: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, 'ʻ' | '‘' | '\'' | '’')
}

/// Split text into lowercased word tokens, keeping the ʻokina inside words
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, c) in text.char_indices() {
        if is_word_char(c) {
            if start.is_none() {
                start = Some(idx);
            }
        } else if let Some(s) = start.take() {
            push_token(&mut tokens, text, s, idx);
        }
    }
    if let Some(s) = start {
        push_token(&mut tokens, text, s, text.len());
    }

    tokens
}

fn push_token(tokens: &mut Vec<Token>, text: &str, start: usize, end: usize) {
    // Leading/trailing quote marks are punctuation, not part of the word
    let raw = &text[start..end];
    let trimmed_start = raw.len() - raw.trim_start_matches(['\'', '’']).len();
    let inner = raw.trim_start_matches(['\'', '’']).trim_end_matches(['\'', '’']);
    if inner.is_empty() {
        return;
    }
    let s = start + trimmed_start;
    let e = s + inner.len();
    let position = tokens.len();
    tokens.push(Token {
        text: inner.to_lowercase(),
        start: s,
        end: e,
        position,
    });
}

/// Remove macrons and the ʻokina so that `ʻōlelo` and `olelo` compare equal
pub fn fold_diacritics(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            'ā' => Some('a'),
            'ē' => Some('e'),
            'ī' => Some('i'),
            'ō' => Some('o'),
            'ū' => Some('u'),
            'Ā' => Some('A'),
            'Ē' => Some('E'),
            'Ī' => Some('I'),
            'Ō' => Some('O'),
            'Ū' => Some('U'),
            'ʻ' | '‘' => None,
            other => Some(other),
        })
        .collect()
}

/// Split text into sentences after `.`, `?` or `!` followed by whitespace
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '?' | '!') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_positions_and_spans() {
        let text = "Aloha mai, kākou!";
        let tokens = tokenize(text);
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(words, vec!["aloha", "mai", "kākou"]);
        assert_eq!(tokens[2].position, 2);
        assert_eq!(&text[tokens[1].start..tokens[1].end], "mai");
    }

    #[test]
    fn test_tokenize_keeps_okina() {
        let tokens = tokenize("ka ʻōlelo Hawaiʻi");
        assert_eq!(tokens[1].text, "ʻōlelo");
        assert_eq!(tokens[2].text, "hawaiʻi");
    }

    #[test]
    fn test_tokenize_strips_quotes() {
        let tokens = tokenize("'aloha'");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "aloha");
    }

    #[test]
    fn test_fold_diacritics() {
        assert_eq!(fold_diacritics("ʻŌlelo Hawaiʻi"), "Olelo Hawaii");
        assert_eq!(fold_diacritics("kākou"), "kakou");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("Aloha mai. Pehea ʻoe? Maikaʻi!");
        assert_eq!(sentences, vec!["Aloha mai.", "Pehea ʻoe?", "Maikaʻi!"]);
        assert_eq!(split_sentences("3.5 percent"), vec!["3.5 percent"]);
    }
}
