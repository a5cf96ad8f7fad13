use chunk_model::{Filter, FilterClause};

use crate::error::RetrieverError;

const MAX_QUERY_CHARS: usize = 1000;

/// Query keys recognized as filter-hint prefixes.
const HINT_KEYS: &[&str] = &["tag", "source", "kind", "since", "path"];

/// Trims `raw`, enforces the `1 ≤ len ≤ 1000` length bound, and peels off
/// any leading `key:value` filter-hint tokens (e.g. `tag:tutorial`) before
/// the free-text portion of the query begins. Hints stop at the first
/// token that isn't a recognized `key:value` pair, so a query like
/// `tag:rust what is ownership` yields filter `tag:rust` and text
/// `"what is ownership"`, while `rust tag:rust` treats the whole string as
/// free text (the hint prefix must lead).
pub fn process(raw: &str, caller_filters: &Filter) -> Result<(String, Filter), RetrieverError> {
    let trimmed = raw.trim();
    let char_len = trimmed.chars().count();
    if char_len == 0 || char_len > MAX_QUERY_CHARS {
        return Err(RetrieverError::EmptyOrOverlongQuery(char_len));
    }

    let (hints, rest) = extract_hints(trimmed)?;
    Ok((rest, hints.merge(caller_filters.clone())))
}

fn extract_hints(input: &str) -> Result<(Filter, String), RetrieverError> {
    let mut clauses: Vec<FilterClause> = Vec::new();
    let mut rest_tokens: Vec<&str> = Vec::new();
    let mut still_in_prefix = true;

    for token in input.split_whitespace() {
        if still_in_prefix {
            if let Some((key, _)) = token.split_once(':') {
                if HINT_KEYS.contains(&key) {
                    let parsed = chunk_model::parse(token)
                        .map_err(|err| RetrieverError::MalformedFilterHint(err.to_string()))?;
                    clauses.extend(parsed.clauses);
                    continue;
                }
            }
            still_in_prefix = false;
        }
        rest_tokens.push(token);
    }

    Ok((Filter { clauses }, rest_tokens.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_query() {
        assert!(process("   ", &Filter::empty()).is_err());
    }

    #[test]
    fn rejects_overlong_query() {
        let long = "a".repeat(MAX_QUERY_CHARS + 1);
        assert!(process(&long, &Filter::empty()).is_err());
    }

    #[test]
    fn extracts_leading_hint_and_leaves_rest_as_text() {
        let (text, filter) = process("tag:tutorial what is ownership", &Filter::empty()).unwrap();
        assert_eq!(text, "what is ownership");
        assert_eq!(filter.tags().collect::<Vec<_>>(), vec!["tutorial"]);
    }

    #[test]
    fn multiple_leading_hints_all_extracted() {
        let (text, filter) = process("tag:tutorial kind:file neural networks", &Filter::empty()).unwrap();
        assert_eq!(text, "neural networks");
        assert_eq!(filter.clauses.len(), 2);
    }

    #[test]
    fn hint_after_free_text_is_not_extracted() {
        let (text, filter) = process("what tag:tutorial means", &Filter::empty()).unwrap();
        assert_eq!(text, "what tag:tutorial means");
        assert!(filter.is_empty());
    }

    #[test]
    fn hints_merge_with_caller_filter() {
        let caller = chunk_model::parse("kind:directory").unwrap();
        let (_, filter) = process("tag:ai neural networks", &caller).unwrap();
        assert_eq!(filter.clauses.len(), 2);
    }
}
