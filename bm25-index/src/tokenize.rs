use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

/// A short list of high-frequency English function words. Dropping them
/// keeps posting lists (and idf) focused on discriminating terms; callers
/// with a different corpus language can supply their own set via
/// [`Tokenizer::new`].
const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "he", "her",
    "his", "i", "in", "into", "is", "it", "its", "of", "on", "or", "she", "that", "the", "their",
    "there", "they", "this", "to", "was", "were", "will", "with", "you", "your",
];

/// Unicode-aware lowercase word tokenizer shared by index-time and
/// query-time tokenization, so the two can never drift apart.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stop_words: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Tokenizer {
    /// Build a tokenizer with a caller-supplied stop-word list, overriding
    /// the built-in English list.
    pub fn new(stop_words: HashSet<String>) -> Self {
        Self { stop_words }
    }

    pub fn stop_words(&self) -> &HashSet<String> {
        &self.stop_words
    }

    /// Splits `text` into lowercase Unicode words, dropping stop words.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .map(|w| w.to_lowercase())
            .filter(|w| !self.stop_words.contains(w.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_splits_on_word_boundaries() {
        let tokens = Tokenizer::default().tokenize("PEP 8: Style Guide for Python Code");
        assert!(tokens.contains(&"pep".to_string()));
        assert!(tokens.contains(&"8".to_string()));
        assert!(tokens.contains(&"style".to_string()));
        assert!(!tokens.contains(&"for".to_string()));
    }

    #[test]
    fn drops_default_stop_words() {
        let tokens = Tokenizer::default().tokenize("the quick fox is in the box");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(!tokens.contains(&"in".to_string()));
        assert!(tokens.contains(&"quick".to_string()));
        assert!(tokens.contains(&"fox".to_string()));
        assert!(tokens.contains(&"box".to_string()));
    }

    #[test]
    fn custom_stop_words_override_defaults() {
        let custom: HashSet<String> = ["foo".to_string()].into_iter().collect();
        let tokens = Tokenizer::new(custom).tokenize("the foo bar");
        assert!(tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"foo".to_string()));
        assert!(tokens.contains(&"bar".to_string()));
    }
}
