//! The scheme state machine: adds, removals and searches over `edb`/`edb2`.
//!
//! There is no explicit state flag; the tables say where the index is:
//!   - **Clean**: the delta table is empty, everything lives in `edb`;
//!   - **Dirty**: additions or tombstones wait in `edb2`;
//!   - **Merging / Rotating**: a merge journal is present (see [`crate::merge`]).
//!
//! Variant behaviour comes from [`Variant`]: which tables are searched, which
//! receives inserts, and how a merge packs postings. `BasePlus` and `PackPlus`
//! share every code path here.
//!
//! Locking: the master key sits behind an `RwLock`. Adds and searches hold it
//! shared, merges and resets hold it exclusively. Counter allocation is
//! serialized by `insert_lock`, held from loading the counter map until the
//! incremented map is persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use parsec_core::types::{EDB, EDB2, META_TABLE};
use parsec_core::{FileId, ParsecError, ParsecResult, Variant};
use parsec_crypto::{tokenize, MasterKey};
use parsec_storage::TableStore;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::counter::{load_counts, CounterMap};
use crate::entry::{search_run, write_entry, PIPELINE_DEPTH};
use crate::merge::JOURNAL;
use crate::posting::{Posting, PostingSet};
use crate::unlock::KDF_SALT;
use crate::words::Followers;

/// Where the index is in its lifecycle, derived from table contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Clean,
    Dirty,
    /// A non-rotating merge was interrupted after truncation.
    Merging,
    /// A rotating merge was interrupted after truncation.
    Rotating,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IndexState::Clean => "clean",
            IndexState::Dirty => "dirty",
            IndexState::Merging => "merging (interrupted, re-run merge)",
            IndexState::Rotating => "rotating (interrupted, re-run merge with the new key)",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub variant: Variant,
    pub adjacency: bool,
    pub state: IndexState,
    pub key_fingerprint: String,
    pub stable_words: usize,
    pub stable_entries: u64,
    pub delta_words: usize,
    pub delta_entries: u64,
}

pub struct Scheme<S: TableStore> {
    pub(crate) store: Arc<S>,
    pub(crate) variant: Variant,
    pub(crate) adjacency: bool,
    pub(crate) key: RwLock<MasterKey>,
    insert_lock: Mutex<()>,
}

impl<S: TableStore> Scheme<S> {
    pub fn new(store: Arc<S>, key: MasterKey, variant: Variant, adjacency: bool) -> Self {
        Self {
            store,
            variant,
            adjacency,
            key: RwLock::new(key),
            insert_lock: Mutex::new(()),
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn adjacency(&self) -> bool {
        self.adjacency
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Copy of the key currently in effect.
    pub async fn key_snapshot(&self) -> MasterKey {
        self.key.read().await.clone()
    }

    pub async fn key_fingerprint(&self) -> String {
        self.key.read().await.fingerprint()
    }

    /// Create any missing table. Leaves existing contents alone.
    pub async fn ensure_tables(&self) -> ParsecResult<()> {
        for table in [EDB, EDB2, META_TABLE] {
            self.store.create(table).await?;
            self.store.create_index(table, "token").await?;
        }
        Ok(())
    }

    /// Drop and recreate every table, keeping only the KDF salt so the same
    /// passphrase keeps unlocking the same key.
    pub async fn reset(&self) -> ParsecResult<()> {
        let _exclusive = self.key.write().await;
        let salt = self
            .store
            .get_exact(META_TABLE, KDF_SALT.as_bytes())
            .await?;
        for table in [EDB, EDB2, META_TABLE] {
            self.store.drop_table(table).await?;
            self.store.create(table).await?;
            self.store.create_index(table, "token").await?;
        }
        if let Some(salt) = salt {
            self.store
                .put(META_TABLE, KDF_SALT.as_bytes(), salt)
                .await?;
        }
        info!(variant = %self.variant, "index reset");
        Ok(())
    }

    /// Record `file` under `word`.
    pub async fn add_word(&self, word: &str, file: &str) -> ParsecResult<()> {
        let posting = Posting::for_file(file, None, self.adjacency);
        let key = self.key.read().await;
        self.append(&key, vec![(word.to_string(), posting)]).await?;
        Ok(())
    }

    /// Record `file` under every word of `words`, with one counter load and
    /// one counter persist. In adjacency mode the follower sets are kept.
    pub async fn add_words(&self, file: &str, words: &Followers) -> ParsecResult<usize> {
        let postings = words
            .iter()
            .map(|(word, next)| {
                (
                    word.clone(),
                    Posting::for_file(file, Some(next), self.adjacency),
                )
            })
            .collect();
        let key = self.key.read().await;
        let written = self.append(&key, postings).await?;
        debug!(words = written, "file indexed");
        Ok(written)
    }

    /// Move the index for `file` from one version of its contents to the
    /// next: tombstone every word of `retract`, then record every word of
    /// `add`. A word in both is retracted first, which resets its follower
    /// set. One counter load and one persist for the whole change.
    pub async fn update_words(
        &self,
        file: &str,
        retract: &[String],
        add: &Followers,
    ) -> ParsecResult<usize> {
        let postings = retract
            .iter()
            .map(|word| (word.clone(), Posting::Tombstone(file.to_string())))
            .chain(add.iter().map(|(word, next)| {
                (
                    word.clone(),
                    Posting::for_file(file, Some(next), self.adjacency),
                )
            }))
            .collect();
        let key = self.key.read().await;
        let written = self.append(&key, postings).await?;
        debug!(entries = written, "file re-indexed");
        Ok(written)
    }

    /// Retract `file` from each word. Takes effect for searches at once and
    /// is folded away by the next merge.
    pub async fn remove_words<I, W>(&self, file: &str, words: I) -> ParsecResult<usize>
    where
        I: IntoIterator<Item = W>,
        W: AsRef<str>,
    {
        let postings = words
            .into_iter()
            .map(|w| (w.as_ref().to_string(), Posting::Tombstone(file.to_string())))
            .collect();
        let key = self.key.read().await;
        let written = self.append(&key, postings).await?;
        debug!(words = written, "file retracted");
        Ok(written)
    }

    async fn append(&self, key: &MasterKey, postings: Vec<(String, Posting)>) -> ParsecResult<usize> {
        if postings.is_empty() {
            return Ok(0);
        }
        let table = self.variant.insert_table();
        let store = &*self.store;

        let _serial = self.insert_lock.lock().await;
        if store.get_exact(META_TABLE, JOURNAL.as_bytes()).await?.is_some() {
            return Err(ParsecError::Unsupported(
                "a merge was interrupted; re-run merge before adding".into(),
            ));
        }
        let mut counts = load_counts(store, table, key).await?;
        let jobs: Vec<(String, u64, Posting)> = postings
            .into_iter()
            .map(|(word, posting)| {
                let next = counts.entry(word.clone()).or_insert(0);
                let counter = *next;
                *next += 1;
                (word, counter, posting)
            })
            .collect();

        // built up front: the add future must stay `Send` for spawned callers
        let writes: Vec<_> = jobs
            .iter()
            .map(|(word, counter, posting)| {
                let token = tokenize(word, table, key);
                let counter = *counter;
                async move { write_entry(store, table, &token, counter, posting).await }
            })
            .collect();
        stream::iter(writes)
            .buffer_unordered(PIPELINE_DEPTH as usize)
            .try_collect::<()>()
            .await?;

        // entries are durable; the counter persist completes the add
        crate::counter::save_counts(store, table, &counts, key).await?;
        Ok(jobs.len())
    }

    /// Files currently containing `word`.
    pub async fn search_word(&self, word: &str) -> ParsecResult<BTreeSet<FileId>> {
        Ok(self.search_postings(word).await?.files())
    }

    /// The folded posting set of `word` across all tables of the variant.
    pub async fn search_postings(&self, word: &str) -> ParsecResult<PostingSet> {
        let key = self.key.read().await;
        let counts = self.table_counts(&key).await?;
        self.postings_with(&key, &counts, word).await
    }

    /// Files containing every word.
    pub async fn search_intersection(
        &self,
        words: &[impl AsRef<str>],
    ) -> ParsecResult<BTreeSet<FileId>> {
        let sets = self.search_many(words).await?;
        let mut sets = sets.into_iter().map(|s| s.files());
        let first = sets.next().ok_or(ParsecError::EmptyQuery)?;
        Ok(sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect()))
    }

    /// Files containing at least one word.
    pub async fn search_union(&self, words: &[impl AsRef<str>]) -> ParsecResult<BTreeSet<FileId>> {
        let sets = self.search_many(words).await?;
        Ok(sets.into_iter().flat_map(|s| s.files()).collect())
    }

    /// Files where the words occur as a phrase: for each adjacent pair, the
    /// second word was recorded as following the first in that file.
    pub async fn search_group(&self, words: &[impl AsRef<str>]) -> ParsecResult<BTreeSet<FileId>> {
        if !self.adjacency {
            return Err(ParsecError::Unsupported(
                "phrase search needs an index built with adjacency enabled".into(),
            ));
        }
        let sets = self.search_many(words).await?;
        let mut result = sets.last().map(|s| s.files()).unwrap_or_default();
        for (i, pair) in sets.windows(2).enumerate() {
            let next_word = words[i + 1].as_ref();
            let matched: BTreeSet<FileId> = pair[0]
                .files()
                .into_iter()
                .filter(|file| {
                    pair[0]
                        .followers(file)
                        .is_some_and(|next| next.contains(next_word))
                })
                .collect();
            result = result.intersection(&matched).cloned().collect();
        }
        Ok(result)
    }

    async fn search_many(&self, words: &[impl AsRef<str>]) -> ParsecResult<Vec<PostingSet>> {
        if words.is_empty() {
            return Err(ParsecError::EmptyQuery);
        }
        let key = self.key.read().await;
        let counts = self.table_counts(&key).await?;
        try_join_all(
            words
                .iter()
                .map(|w| self.postings_with(&key, &counts, w.as_ref())),
        )
        .await
    }

    pub(crate) async fn table_counts(
        &self,
        key: &MasterKey,
    ) -> ParsecResult<Vec<(&'static str, CounterMap)>> {
        let mut counts = Vec::with_capacity(2);
        for &table in self.variant.tables() {
            counts.push((table, load_counts(&*self.store, table, key).await?));
        }
        Ok(counts)
    }

    async fn postings_with(
        &self,
        key: &MasterKey,
        counts: &[(&'static str, CounterMap)],
        word: &str,
    ) -> ParsecResult<PostingSet> {
        let mut set = PostingSet::new();
        for (table, map) in counts {
            // a word a table never saw costs no lookups there
            let Some(&count) = map.get(word) else {
                continue;
            };
            let token = tokenize(word, table, key);
            set.extend(search_run(&*self.store, table, &token, 0, Some(count)).await?);
        }
        Ok(set)
    }

    /// Counter map of `table` under the current key.
    pub async fn counts(&self, table: &str) -> ParsecResult<CounterMap> {
        let key = self.key.read().await;
        load_counts(&*self.store, table, &key).await
    }

    pub async fn status(&self) -> ParsecResult<IndexStatus> {
        let key = self.key.read().await;
        let journal = crate::merge::probe_journal(&*self.store, &key).await?;
        let counts: BTreeMap<&str, CounterMap> =
            self.table_counts(&key).await?.into_iter().collect();
        let stable = counts.get(EDB).cloned().unwrap_or_default();
        let delta = if self.variant.tables().contains(&EDB2) {
            counts.get(EDB2).cloned().unwrap_or_default()
        } else {
            CounterMap::new()
        };

        let delta_entries: u64 = delta.values().sum();
        let state = match journal {
            Some(true) => IndexState::Rotating,
            Some(false) => IndexState::Merging,
            None if delta_entries > 0 => IndexState::Dirty,
            None => IndexState::Clean,
        };

        Ok(IndexStatus {
            variant: self.variant,
            adjacency: self.adjacency,
            state,
            key_fingerprint: key.fingerprint(),
            stable_words: stable.len(),
            stable_entries: stable.values().sum(),
            delta_words: delta.len(),
            delta_entries,
        })
    }
}
