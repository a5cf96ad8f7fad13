/// Heuristic token count used for chunk packing. Deliberately
/// decoupled from any embedder tokenizer — `file-chunker` has no
/// dependency on `embedding-provider`, so it counts whitespace/punctuation
/// runs rather than invoking a real subword tokenizer.
pub fn approx_tokens(text: &str) -> u32 {
    let mut count = 0u32;
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_word = false;
            continue;
        }
        if ch.is_alphanumeric() {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            // Punctuation counts as its own token, matching how subword
            // tokenizers typically emit separate punctuation tokens.
            count += 1;
            in_word = false;
        }
    }
    count
}

/// Average characters per token, used to convert the token-denominated
/// `overlap_tokens`/`target_tokens` config into char budgets when slicing
/// text. English technical prose averages ~5-6 chars/token including
/// whitespace; this is a heuristic, not a tokenizer-exact conversion.
pub const CHARS_PER_TOKEN: usize = 6;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_and_punctuation() {
        assert_eq!(approx_tokens("hello, world!"), 4);
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("   "), 0);
    }
}
