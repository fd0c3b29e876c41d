//! Posting payloads and their versioned encoding
//!
//! Wire format of one posting (the plaintext inside an entry):
//! ```text
//! [1 byte: format version = 1][JSON: tagged posting]
//! ```
//!
//! Postings are only ever decoded as data. An unknown version or a body that
//! does not match the schema is a [`ParsecError::Codec`].

use std::collections::{BTreeMap, BTreeSet};

use parsec_core::{FileId, ParsecError, ParsecResult};
use serde::{Deserialize, Serialize};

pub const POSTING_VERSION: u8 = 1;

/// One occurrence record in adjacency mode: the file and the words that
/// follow the indexed word somewhere in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub file: FileId,
    #[serde(default)]
    pub next: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Posting {
    /// A single file (delta adds) or a bucket of up to `B` files (packed merge).
    Files(Vec<FileId>),
    /// Adjacency-mode postings.
    Groups(Vec<GroupEntry>),
    /// Retracts the file from this word. Consumed by the next merge.
    Tombstone(FileId),
}

impl Posting {
    /// Posting recorded when `file` is added under a word.
    pub fn for_file(file: &str, next: Option<&BTreeSet<String>>, adjacency: bool) -> Self {
        if adjacency {
            Posting::Groups(vec![GroupEntry {
                file: file.to_string(),
                next: next.cloned().unwrap_or_default(),
            }])
        } else {
            Posting::Files(vec![file.to_string()])
        }
    }

    /// Files this posting records; empty for a tombstone.
    pub fn added_files(&self) -> Vec<&str> {
        match self {
            Posting::Files(files) => files.iter().map(String::as_str).collect(),
            Posting::Groups(groups) => groups.iter().map(|g| g.file.as_str()).collect(),
            Posting::Tombstone(_) => Vec::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Posting::Tombstone(_))
    }

    pub fn encode(&self) -> ParsecResult<Vec<u8>> {
        let mut out = vec![POSTING_VERSION];
        serde_json::to_writer(&mut out, self)
            .map_err(|e| ParsecError::Codec(format!("encoding posting: {e}")))?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> ParsecResult<Self> {
        match bytes.split_first() {
            None => Err(ParsecError::Codec("empty posting".into())),
            Some((&POSTING_VERSION, body)) => serde_json::from_slice(body)
                .map_err(|e| ParsecError::Codec(format!("decoding posting: {e}"))),
            Some((version, _)) => Err(ParsecError::Codec(format!(
                "unknown posting format version {version}"
            ))),
        }
    }
}

/// The logical posting set of one word: file → follower words.
///
/// Built by folding postings in counter order, stable table first. Later
/// tombstones retract earlier adds; a later add revives a retracted file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingSet {
    files: BTreeMap<FileId, BTreeSet<String>>,
}

impl PostingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, posting: Posting) {
        match posting {
            Posting::Files(files) => {
                for file in files {
                    self.files.entry(file).or_default();
                }
            }
            Posting::Groups(groups) => {
                for group in groups {
                    self.files.entry(group.file).or_default().extend(group.next);
                }
            }
            Posting::Tombstone(file) => {
                self.files.remove(&file);
            }
        }
    }

    pub fn files(&self) -> BTreeSet<FileId> {
        self.files.keys().cloned().collect()
    }

    /// Words recorded as following this word in `file`.
    pub fn followers(&self, file: &str) -> Option<&BTreeSet<String>> {
        self.files.get(file)
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Re-pack into postings of at most `bucket_size` files each, in file
    /// order. Every bucket but the last is full.
    pub fn into_buckets(self, bucket_size: usize, adjacency: bool) -> Vec<Posting> {
        let entries: Vec<(FileId, BTreeSet<String>)> = self.files.into_iter().collect();
        entries
            .chunks(bucket_size.max(1))
            .map(|chunk| {
                if adjacency {
                    Posting::Groups(
                        chunk
                            .iter()
                            .map(|(file, next)| GroupEntry {
                                file: file.clone(),
                                next: next.clone(),
                            })
                            .collect(),
                    )
                } else {
                    Posting::Files(chunk.iter().map(|(file, _)| file.clone()).collect())
                }
            })
            .collect()
    }
}

impl Extend<Posting> for PostingSet {
    fn extend<I: IntoIterator<Item = Posting>>(&mut self, iter: I) {
        for posting in iter {
            self.apply(posting);
        }
    }
}

impl FromIterator<Posting> for PostingSet {
    fn from_iter<I: IntoIterator<Item = Posting>>(iter: I) -> Self {
        let mut set = PostingSet::new();
        set.extend(iter);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(ids: &[&str]) -> Posting {
        Posting::Files(ids.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_codec_roundtrip_all_kinds() {
        let postings = [
            files(&["a.txt"]),
            files(&["a.txt", "b.txt", "c.txt"]),
            Posting::Groups(vec![GroupEntry {
                file: "a.txt".into(),
                next: ["keeper".to_string()].into(),
            }]),
            Posting::Tombstone("a.txt".into()),
        ];
        for posting in postings {
            let bytes = posting.encode().unwrap();
            assert_eq!(bytes[0], POSTING_VERSION);
            assert_eq!(Posting::decode(&bytes).unwrap(), posting);
        }
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = files(&["a"]).encode().unwrap();
        bytes[0] = 9;
        let err = Posting::decode(&bytes).unwrap_err();
        assert!(matches!(err, ParsecError::Codec(msg) if msg.contains("version 9")));
    }

    #[test]
    fn test_program_text_is_not_a_posting() {
        let mut bytes = vec![POSTING_VERSION];
        bytes.extend_from_slice(b"{'a.txt', __import__('os')}");
        assert!(matches!(
            Posting::decode(&bytes),
            Err(ParsecError::Codec(_))
        ));
        assert!(Posting::decode(&[]).is_err());
    }

    #[test]
    fn test_fold_tombstone_retracts_then_add_revives() {
        let set: PostingSet = [
            files(&["a", "b"]),
            Posting::Tombstone("a".into()),
            files(&["c"]),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.files(), ["b".to_string(), "c".to_string()].into());

        let revived: PostingSet = [
            files(&["a"]),
            Posting::Tombstone("a".into()),
            files(&["a"]),
        ]
        .into_iter()
        .collect();
        assert!(revived.contains("a"));
    }

    #[test]
    fn test_groups_merge_followers() {
        let set: PostingSet = [
            Posting::Groups(vec![GroupEntry {
                file: "a".into(),
                next: ["keeper".to_string()].into(),
            }]),
            Posting::Groups(vec![GroupEntry {
                file: "a".into(),
                next: ["beam".to_string()].into(),
            }]),
        ]
        .into_iter()
        .collect();
        let next = set.followers("a").unwrap();
        assert!(next.contains("keeper") && next.contains("beam"));
    }

    #[test]
    fn test_into_buckets_sizes() {
        let set: PostingSet = (0..7).map(|i| files(&[&format!("f{i}")])).collect();
        let buckets = set.clone().into_buckets(3, false);
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0], files(&["f0", "f1", "f2"]));
        assert_eq!(buckets[2], files(&["f6"]));

        let singles = set.into_buckets(1, true);
        assert_eq!(singles.len(), 7);
        assert!(matches!(&singles[0], Posting::Groups(g) if g.len() == 1));
    }

    #[test]
    fn test_empty_set_has_no_buckets() {
        assert!(PostingSet::new().into_buckets(4, false).is_empty());
    }
}
