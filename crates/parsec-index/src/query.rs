//! Query evaluation over the scheme's search primitives.

use std::collections::BTreeSet;
use std::fmt;

use parsec_core::{FileId, ParsecError, ParsecResult};
use parsec_storage::TableStore;

use crate::scheme::Scheme;

/// How the terms of `W1+W2+…` combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
    #[default]
    Intersection,
    Union,
    Phrase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Word(String),
    And(Vec<String>),
    Or(Vec<String>),
    Phrase(Vec<String>),
}

impl Query {
    /// Parse `W1+W2+…`. Terms are trimmed and lower-cased; empty terms are
    /// dropped. A query with no terms left is [`ParsecError::EmptyQuery`].
    pub fn parse(text: &str, mode: QueryMode) -> ParsecResult<Self> {
        let mut words: Vec<String> = text
            .split('+')
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        match (words.len(), mode) {
            (0, _) => Err(ParsecError::EmptyQuery),
            (1, _) => Ok(Query::Word(words.remove(0))),
            (_, QueryMode::Intersection) => Ok(Query::And(words)),
            (_, QueryMode::Union) => Ok(Query::Or(words)),
            (_, QueryMode::Phrase) => Ok(Query::Phrase(words)),
        }
    }

    pub fn words(&self) -> &[String] {
        match self {
            Query::Word(w) => std::slice::from_ref(w),
            Query::And(ws) | Query::Or(ws) | Query::Phrase(ws) => ws,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (op, words) = match self {
            Query::Word(w) => return f.write_str(w),
            Query::And(ws) => (" AND ", ws),
            Query::Or(ws) => (" OR ", ws),
            Query::Phrase(ws) => return write!(f, "\"{}\"", ws.join(" ")),
        };
        f.write_str(&words.join(op))
    }
}

pub async fn evaluate<S: TableStore>(
    scheme: &Scheme<S>,
    query: &Query,
) -> ParsecResult<BTreeSet<FileId>> {
    match query {
        Query::Word(word) => scheme.search_word(word).await,
        Query::And(words) => scheme.search_intersection(words).await,
        Query::Or(words) => scheme.search_union(words).await,
        Query::Phrase(words) => scheme.search_group(words).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!(
            Query::parse("Storm+ harbour", QueryMode::Intersection).unwrap(),
            Query::And(vec!["storm".into(), "harbour".into()])
        );
        assert_eq!(
            Query::parse("storm+harbour", QueryMode::Union).unwrap(),
            Query::Or(vec!["storm".into(), "harbour".into()])
        );
        assert_eq!(
            Query::parse("lighthouse+keeper", QueryMode::Phrase).unwrap(),
            Query::Phrase(vec!["lighthouse".into(), "keeper".into()])
        );
    }

    #[test]
    fn test_single_term_is_word() {
        assert_eq!(
            Query::parse("++Lighthouse+", QueryMode::Union).unwrap(),
            Query::Word("lighthouse".into())
        );
    }

    #[test]
    fn test_empty_query_rejected() {
        for text in ["", "+", " + + "] {
            assert!(matches!(
                Query::parse(text, QueryMode::Intersection),
                Err(ParsecError::EmptyQuery)
            ));
        }
    }

    #[test]
    fn test_display() {
        let q = Query::parse("a1+b2", QueryMode::Union).unwrap();
        assert_eq!(q.to_string(), "a1 OR b2");
        assert_eq!(q.words().len(), 2);
    }
}
