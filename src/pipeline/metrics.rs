//! Word statistics over recognized text.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How many entries `top_words` holds at most.
pub const TOP_WORDS_LIMIT: usize = 10;

/// Anything that is not an ASCII letter or a space becomes a space.
static NON_LETTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[^a-z ]").expect("static regex")
});

/// A token and how often it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCount {
    pub word: String,
    pub count: usize,
}

/// Metrics derived from a document's text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetrics {
    pub total_words: usize,
    /// Most frequent tokens, by descending count then ascending token.
    pub top_words: Vec<WordCount>,
}

/// Lower-case, strip non-letters, split on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    NON_LETTER
        .replace_all(&lowered, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Compute word metrics for `text`.
pub fn calculate_metrics(text: &str) -> DocumentMetrics {
    let tokens = tokenize(text);

    let mut frequency: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        *frequency.entry(token.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<(&str, usize)> = frequency.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let top_words = ranked
        .into_iter()
        .take(TOP_WORDS_LIMIT)
        .map(|(word, count)| WordCount {
            word: word.to_string(),
            count,
        })
        .collect();

    DocumentMetrics {
        total_words: tokens.len(),
        top_words,
    }
}

/// Render top words as `word (count), ...` for human-readable reports.
pub fn format_top_words(top_words: &[WordCount]) -> String {
    if top_words.is_empty() {
        return "(none)".to_string();
    }
    top_words
        .iter()
        .map(|w| format!("{} ({})", w.word, w.count))
        .collect::<Vec<_>>()
        .join(", ")
}
