use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ids::SourceId;
use crate::types::SourceKind;

/// One clause of the filter grammar:
/// `clause := tag:<string> | source:<source_id> | kind:<...> | since:<ISO8601> | path:<glob>`
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    Tag(String),
    Source(SourceId),
    Kind(SourceKind),
    Since(DateTime<Utc>),
    PathPrefix(String),
}

/// A conjunctive (AND) list of [`FilterClause`]s. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<FilterClause>,
}

impl Filter {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn and(mut self, clause: FilterClause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// AND two filters together (used to combine query-prefix hints with
    /// caller-supplied filters).
    pub fn merge(mut self, other: Filter) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().filter_map(|c| match c {
            FilterClause::Tag(t) => Some(t.as_str()),
            _ => None,
        })
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.clauses.iter().filter_map(|c| match c {
            FilterClause::Source(s) => Some(s),
            _ => None,
        })
    }

    pub fn kinds(&self) -> impl Iterator<Item = SourceKind> + '_ {
        self.clauses.iter().filter_map(|c| match c {
            FilterClause::Kind(k) => Some(*k),
            _ => None,
        })
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.clauses.iter().find_map(|c| match c {
            FilterClause::Since(t) => Some(*t),
            _ => None,
        })
    }

    pub fn path_prefixes(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().filter_map(|c| match c {
            FilterClause::PathPrefix(p) => Some(p.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("empty filter clause")]
    EmptyClause,
    #[error("malformed clause `{0}`: expected `key:value`")]
    MissingColon(String),
    #[error("unknown filter key `{0}`")]
    UnknownKey(String),
    #[error("invalid source kind `{0}`")]
    InvalidKind(String),
    #[error("invalid ISO8601 timestamp `{0}`")]
    InvalidTimestamp(String),
}

/// Parse the comma-separated filter grammar:
/// `filter := clause ("," clause)*`.
pub fn parse(input: &str) -> Result<Filter, FilterParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Filter::empty());
    }

    let mut clauses = Vec::new();
    for raw in input.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FilterParseError::EmptyClause);
        }
        let (key, value) = raw
            .split_once(':')
            .ok_or_else(|| FilterParseError::MissingColon(raw.to_string()))?;
        let value = value.trim();
        let clause = match key.trim() {
            "tag" => FilterClause::Tag(value.to_string()),
            "source" => FilterClause::Source(SourceId::from(value)),
            "kind" => {
                let kind: SourceKind = value
                    .parse()
                    .map_err(|_| FilterParseError::InvalidKind(value.to_string()))?;
                FilterClause::Kind(kind)
            }
            "since" => {
                let ts = DateTime::parse_from_rfc3339(value)
                    .map_err(|_| FilterParseError::InvalidTimestamp(value.to_string()))?
                    .with_timezone(&Utc);
                FilterClause::Since(ts)
            }
            "path" => FilterClause::PathPrefix(value.to_string()),
            other => return Err(FilterParseError::UnknownKey(other.to_string())),
        };
        clauses.push(clause);
    }
    Ok(Filter { clauses })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_conjunctive_clauses() {
        let f = parse("tag:tutorial,kind:file").unwrap();
        assert_eq!(f.clauses.len(), 2);
        assert_eq!(f.tags().collect::<Vec<_>>(), vec!["tutorial"]);
        assert_eq!(f.kinds().collect::<Vec<_>>(), vec![SourceKind::File]);
    }

    #[test]
    fn empty_input_is_empty_filter() {
        assert_eq!(parse("").unwrap(), Filter::empty());
        assert_eq!(parse("   ").unwrap(), Filter::empty());
    }

    #[test]
    fn rejects_unknown_key() {
        assert_eq!(
            parse("bogus:x").unwrap_err(),
            FilterParseError::UnknownKey("bogus".into())
        );
    }

    #[test]
    fn rejects_missing_colon() {
        assert_eq!(
            parse("tag").unwrap_err(),
            FilterParseError::MissingColon("tag".into())
        );
    }

    #[test]
    fn since_parses_rfc3339() {
        let f = parse("since:2026-01-01T00:00:00Z").unwrap();
        assert!(f.since().is_some());
    }
}
