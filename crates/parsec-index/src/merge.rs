//! Merge: fold the delta table into the stable table, optionally re-keying.
//!
//! 1. Load both counter maps under the current key.
//! 2. Plan every word that needs rewriting. A word is fully reloaded from
//!    `edb` when rotating, under `Base`, when its delta holds a tombstone, or
//!    when its delta re-adds a file its stable entries already hold; such
//!    words are rewritten from counter 0 and stale rows past the new count
//!    are deleted. Otherwise `PackPlus` refills the last (possibly partial)
//!    bucket and rewrites from `count - 1`, and `BasePlus` appends at
//!    `count`. Either way a word with `N` files ends in `⌈N/B⌉` entries.
//! 3. Seal the complete plan as the merge journal under the completion key
//!    (the new key when rotating) in the meta table.
//! 4. Truncate `edb2`, and `edb` when rotating.
//! 5. Write the planned buckets into `edb` under the completion key.
//! 6. Persist the final `edb` counters and an empty `edb2` map, then delete
//!    the journal.
//!
//! A failure in steps 4–6 is reported as [`ParsecError::MergeInterrupted`]
//! and the journal stays behind. The next `merge` finds it under the current
//! or the new key and replays steps 4–6 before doing anything else. Replay is
//! idempotent.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use parsec_core::types::{EDB, EDB2, META_TABLE};
use parsec_core::{MergeStage, ParsecError, ParsecResult, Variant};
use parsec_crypto::{tokenize, MasterKey};
use parsec_storage::TableStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::counter::{load_counts, read_sealed, save_counts, write_sealed, CounterMap};
use crate::entry::{search_run, write_entry, PIPELINE_DEPTH};
use crate::posting::{Posting, PostingSet};
use crate::scheme::Scheme;

/// Meta-table row of the merge journal.
pub const JOURNAL: &str = "merge_journal";

const JOURNAL_VERSION: u8 = 1;

/// Progress callback: (done, total, phase)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Words whose stable entries were rewritten
    pub words_rewritten: usize,
    /// Entries in `edb` after the merge
    pub stable_entries: u64,
    /// The index now runs under the new key
    pub rotated: bool,
    /// An interrupted merge was replayed first
    pub resumed: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct MergeJournal {
    version: u8,
    rotating: bool,
    /// Final `edb` counter map, including untouched words
    stable_counts: CounterMap,
    words: BTreeMap<String, WordPlan>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WordPlan {
    /// First counter written
    start: u64,
    /// Stable count before the merge
    previous: u64,
    buckets: Vec<Posting>,
}

fn interrupted(stage: MergeStage) -> impl FnOnce(ParsecError) -> ParsecError {
    move |source| ParsecError::MergeInterrupted {
        stage,
        source: Box::new(source),
    }
}

fn tick(progress: Option<&ProgressFn>, done: usize, total: usize, phase: &str) {
    if let Some(cb) = progress {
        cb(done as u64, total as u64, phase);
    }
}

/// Whether a journal is pending, and if so whether it belongs to a rotation.
/// A journal that does not open under `key` was sealed under a new key.
pub(crate) async fn probe_journal<S: TableStore>(
    store: &S,
    key: &MasterKey,
) -> ParsecResult<Option<bool>> {
    match read_journal(store, key).await {
        Ok(journal) => Ok(journal.map(|j| j.rotating)),
        Err(e) if e.is_decryption_failure() => Ok(Some(true)),
        Err(e) => Err(e),
    }
}

async fn read_journal<S: TableStore>(
    store: &S,
    key: &MasterKey,
) -> ParsecResult<Option<MergeJournal>> {
    let Some(plain) = read_sealed(store, JOURNAL, key).await? else {
        return Ok(None);
    };
    let journal: MergeJournal = serde_json::from_slice(&plain)
        .map_err(|e| ParsecError::Codec(format!("decoding merge journal: {e}")))?;
    if journal.version != JOURNAL_VERSION {
        return Err(ParsecError::Codec(format!(
            "unknown merge journal version {}",
            journal.version
        )));
    }
    Ok(Some(journal))
}

impl<S: TableStore> Scheme<S> {
    /// Compact `edb2` into `edb`, re-keying everything when `new_key` is set.
    ///
    /// Holds the key exclusively for the whole run: no add or search of this
    /// scheme overlaps a merge. On success with a new key, the scheme switches
    /// to it.
    pub async fn merge(
        &self,
        new_key: Option<MasterKey>,
        progress: Option<&ProgressFn>,
    ) -> ParsecResult<MergeReport> {
        let started = Instant::now();
        let mut key = self.key.write().await;
        let mut resumed = false;

        if let Some((journal, under_new_key)) = self.find_journal(&key, new_key.as_ref()).await? {
            warn!(
                words = journal.words.len(),
                rotating = journal.rotating,
                "replaying interrupted merge"
            );
            let completion = match (&new_key, under_new_key) {
                (Some(new), true) => new,
                _ => &*key,
            };
            self.apply_journal(&journal, completion, progress).await?;
            resumed = true;

            if under_new_key {
                if let Some(new) = new_key {
                    *key = new;
                }
                let report = MergeReport {
                    words_rewritten: journal.words.len(),
                    stable_entries: journal.stable_counts.values().sum(),
                    rotated: true,
                    resumed,
                    elapsed: started.elapsed(),
                };
                info!(fingerprint = %key.fingerprint(), "interrupted rotation completed");
                return Ok(report);
            }
        }

        let rotating = new_key.is_some();
        let journal = self.plan(&key, rotating, progress).await?;
        let completion = new_key.as_ref().unwrap_or(&*key);

        // past this write, a failure leaves a replayable plan
        let plain = serde_json::to_vec(&journal)
            .map_err(|e| ParsecError::Codec(format!("encoding merge journal: {e}")))?;
        write_sealed(&*self.store, JOURNAL, &plain, completion).await?;

        self.apply_journal(&journal, completion, progress).await?;

        let report = MergeReport {
            words_rewritten: journal.words.len(),
            stable_entries: journal.stable_counts.values().sum(),
            rotated: rotating,
            resumed,
            elapsed: started.elapsed(),
        };
        if let Some(new) = new_key {
            *key = new;
        }
        info!(
            words = report.words_rewritten,
            stable_entries = report.stable_entries,
            rotated = report.rotated,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "merge complete"
        );
        Ok(report)
    }

    /// Locate a pending journal, trying the new key first. Returns the journal
    /// and whether it was sealed under the new key.
    async fn find_journal(
        &self,
        key: &MasterKey,
        new_key: Option<&MasterKey>,
    ) -> ParsecResult<Option<(MergeJournal, bool)>> {
        let store = &*self.store;
        if let Some(new) = new_key {
            match read_journal(store, new).await {
                Ok(Some(journal)) => return Ok(Some((journal, true))),
                Ok(None) => return Ok(None),
                Err(e) if e.is_decryption_failure() => {}
                Err(e) => return Err(e),
            }
        }
        match read_journal(store, key).await {
            Ok(journal) => Ok(journal.map(|j| (j, false))),
            Err(e) if e.is_decryption_failure() && new_key.is_none() => Err(
                ParsecError::Unsupported(
                    "an interrupted key rotation is pending; re-run merge with its new key".into(),
                ),
            ),
            Err(e) => Err(e),
        }
    }

    async fn plan(
        &self,
        key: &MasterKey,
        rotating: bool,
        progress: Option<&ProgressFn>,
    ) -> ParsecResult<MergeJournal> {
        let store = &*self.store;
        let two_tables = self.variant.tables().contains(&EDB2);
        let stable = load_counts(store, EDB, key).await?;
        let delta = if two_tables {
            load_counts(store, EDB2, key).await?
        } else {
            CounterMap::new()
        };

        let words: BTreeSet<&String> = stable.keys().chain(delta.keys()).collect();
        let total = words.len();
        let mut stable_counts = stable.clone();
        let mut plans = BTreeMap::new();

        for (done, word) in words.into_iter().enumerate() {
            let delta_postings = match delta.get(word) {
                Some(&count) => {
                    search_run(store, EDB2, &tokenize(word, EDB2, key), 0, Some(count)).await?
                }
                None => Vec::new(),
            };
            let reload = rotating
                || self.variant == Variant::Base
                || delta_postings.iter().any(Posting::is_tombstone);

            if !reload && delta_postings.is_empty() {
                tick(progress, done + 1, total, "planning");
                continue;
            }

            let previous = stable.get(word).copied().unwrap_or(0);
            let stable_run =
                search_run(store, EDB, &tokenize(word, EDB, key), 0, Some(previous)).await?;
            // a file the stable entries already hold must not be packed twice
            let repeated = !reload && {
                let stable_set: PostingSet = stable_run.iter().cloned().collect();
                delta_postings
                    .iter()
                    .flat_map(Posting::added_files)
                    .any(|file| stable_set.contains(file))
            };
            let (start, mut set) = if reload || repeated {
                (0, stable_run.into_iter().collect::<PostingSet>())
            } else if self.variant.is_packed() && previous > 0 {
                (previous - 1, stable_run.into_iter().last().into_iter().collect())
            } else {
                (previous, PostingSet::new())
            };
            set.extend(delta_postings);

            let buckets = set.into_buckets(self.variant.bucket_size(), self.adjacency);
            let final_count = start + buckets.len() as u64;
            if final_count == 0 {
                stable_counts.remove(word);
            } else {
                stable_counts.insert(word.clone(), final_count);
            }
            plans.insert(
                word.clone(),
                WordPlan {
                    start,
                    previous,
                    buckets,
                },
            );
            tick(progress, done + 1, total, "planning");
        }

        Ok(MergeJournal {
            version: JOURNAL_VERSION,
            rotating,
            stable_counts,
            words: plans,
        })
    }

    async fn apply_journal(
        &self,
        journal: &MergeJournal,
        key: &MasterKey,
        progress: Option<&ProgressFn>,
    ) -> ParsecResult<()> {
        let store = &*self.store;

        store
            .truncate(EDB2)
            .await
            .map_err(interrupted(MergeStage::Truncate))?;
        if journal.rotating {
            store
                .truncate(EDB)
                .await
                .map_err(interrupted(MergeStage::Truncate))?;
        }

        let total = journal.words.len();
        for (done, (word, plan)) in journal.words.iter().enumerate() {
            let token = tokenize(word, EDB, key);
            let token = &token;
            let writes: Vec<_> = plan
                .buckets
                .iter()
                .enumerate()
                .map(|(i, bucket)| write_entry(store, EDB, token, plan.start + i as u64, bucket))
                .collect();
            stream::iter(writes)
                .buffer_unordered(PIPELINE_DEPTH as usize)
                .try_collect::<()>()
                .await
                .map_err(interrupted(MergeStage::Rewrite))?;

            // a rotation truncated `edb`, so only in-place rewrites leave stale rows
            if !journal.rotating {
                let end = plan.start + plan.buckets.len() as u64;
                for stale in end..plan.previous {
                    store
                        .remove(EDB, &token.entry_key(stale))
                        .await
                        .map_err(interrupted(MergeStage::Rewrite))?;
                }
            }
            tick(progress, done + 1, total, "rewriting");
        }

        save_counts(store, EDB, &journal.stable_counts, key)
            .await
            .map_err(interrupted(MergeStage::PersistCounters))?;
        save_counts(store, EDB2, &CounterMap::new(), key)
            .await
            .map_err(interrupted(MergeStage::PersistCounters))?;
        store
            .remove(META_TABLE, JOURNAL.as_bytes())
            .await
            .map_err(interrupted(MergeStage::PersistCounters))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_storage::{memory_operator, OpendalTables};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn scheme(variant: Variant) -> Scheme<OpendalTables> {
        let store = Arc::new(OpendalTables::new(memory_operator().unwrap()));
        Scheme::new(store, MasterKey::from_bytes([8u8; 32]), variant, false)
    }

    #[tokio::test]
    async fn test_merge_empties_delta() {
        let s = scheme(Variant::BasePlus);
        s.add_word("w", "a").await.unwrap();
        s.add_word("w", "b").await.unwrap();

        let report = s.merge(None, None).await.unwrap();
        assert_eq!(report.words_rewritten, 1);
        assert!(!report.rotated);
        assert!(s.counts(EDB2).await.unwrap().is_empty());
        assert_eq!(s.counts(EDB).await.unwrap().get("w"), Some(&2));
    }

    #[tokio::test]
    async fn test_empty_merge_is_noop() {
        let s = scheme(Variant::PackPlus { bucket_size: 3 });
        let report = s.merge(None, None).await.unwrap();
        assert_eq!(report.words_rewritten, 0);
        assert_eq!(report.stable_entries, 0);
    }

    #[tokio::test]
    async fn test_pack_refills_last_bucket() {
        let s = scheme(Variant::PackPlus { bucket_size: 3 });
        for f in ["a", "b"] {
            s.add_word("w", f).await.unwrap();
        }
        s.merge(None, None).await.unwrap();
        assert_eq!(s.counts(EDB).await.unwrap().get("w"), Some(&1));

        for f in ["c", "d"] {
            s.add_word("w", f).await.unwrap();
        }
        s.merge(None, None).await.unwrap();
        assert_eq!(s.counts(EDB).await.unwrap().get("w"), Some(&2));
        assert_eq!(s.search_word("w").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_readded_file_is_not_packed_twice() {
        let s = scheme(Variant::PackPlus { bucket_size: 2 });
        for f in ["f0", "f1", "f2", "f3"] {
            s.add_word("w", f).await.unwrap();
        }
        s.merge(None, None).await.unwrap();

        s.add_word("w", "f0").await.unwrap();
        s.merge(None, None).await.unwrap();
        assert_eq!(s.counts(EDB).await.unwrap().get("w"), Some(&2));
        assert_eq!(s.search_word("w").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_base_plus_readd_keeps_one_entry_per_file() {
        let s = scheme(Variant::BasePlus);
        for f in ["a", "b"] {
            s.add_word("w", f).await.unwrap();
        }
        s.merge(None, None).await.unwrap();

        for _ in 0..3 {
            s.add_word("w", "a").await.unwrap();
            s.merge(None, None).await.unwrap();
        }
        assert_eq!(s.counts(EDB).await.unwrap().get("w"), Some(&2));
    }

    #[tokio::test]
    async fn test_progress_reports_phases() {
        let s = scheme(Variant::BasePlus);
        s.add_word("x", "a").await.unwrap();
        s.add_word("y", "a").await.unwrap();

        let calls = Arc::new(AtomicU64::new(0));
        let seen = calls.clone();
        let cb: ProgressFn = Box::new(move |done, total, _phase| {
            assert!(done <= total);
            seen.fetch_add(1, Ordering::SeqCst);
        });
        s.merge(None, Some(&cb)).await.unwrap();
        // two words planned, two rewritten
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_tombstoned_word_drops_out_of_stable() {
        let s = scheme(Variant::BasePlus);
        s.add_word("w", "a").await.unwrap();
        s.merge(None, None).await.unwrap();
        s.remove_words("a", ["w"]).await.unwrap();
        s.merge(None, None).await.unwrap();

        assert!(s.counts(EDB).await.unwrap().get("w").is_none());
        assert!(s.search_word("w").await.unwrap().is_empty());
    }
}
