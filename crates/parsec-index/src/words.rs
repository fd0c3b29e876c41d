//! Word extraction from plaintext files.
//!
//! A word is a maximal run of alphanumeric characters or `_`, lower-cased.
//! Words shorter than the configured minimum are dropped before adjacency is
//! recorded, so a phrase never spans a dropped word.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use parsec_core::ParsecResult;

/// word → words that immediately follow it somewhere in the file
pub type Followers = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordIndex {
    pub followers: Followers,
    /// Kept word occurrences, duplicates included
    pub tokens: usize,
}

impl WordIndex {
    pub fn len(&self) -> usize {
        self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.followers.keys().map(String::as_str)
    }
}

pub fn extract_words(text: &str, min_word_length: usize) -> WordIndex {
    let lowered = text.to_lowercase();
    let kept: Vec<&str> = lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() >= min_word_length.max(1))
        .collect();

    let mut followers = Followers::new();
    for (i, word) in kept.iter().enumerate() {
        let next = followers.entry((*word).to_string()).or_default();
        if let Some(following) = kept.get(i + 1) {
            next.insert((*following).to_string());
        }
    }

    WordIndex {
        followers,
        tokens: kept.len(),
    }
}

/// Read `path` and extract its words. A file that is not UTF-8 text is an
/// `InvalidData` I/O error.
pub async fn file_words(path: &Path, min_word_length: usize) -> ParsecResult<WordIndex> {
    let bytes = tokio::fs::read(path).await?;
    let text = text_of(bytes)?;
    Ok(extract_words(&text, min_word_length))
}

pub(crate) fn text_of(bytes: Vec<u8>) -> ParsecResult<String> {
    String::from_utf8(bytes).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("not UTF-8 text: {e}"),
        )
        .into()
    })
}
