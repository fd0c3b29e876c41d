//! File-level workflow: encrypted copy + word index, and their reversal.
//!
//! File identifiers are paths relative to the client root, with `/`
//! separators, so the same file is named the same on every platform.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parsec_core::config::ParsecConfig;
use parsec_core::{FileId, ParsecResult};
use parsec_crypto::MasterKey;
use parsec_storage::{build_from_core_config, OpendalTables, TableStore};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::merge::{MergeReport, ProgressFn};
use crate::query::{evaluate, Query};
use crate::scheme::{IndexStatus, Scheme};
use crate::unlock::{kdf_params, unlock};
use crate::vault::FileVault;
use crate::words::{extract_words, file_words, text_of, Followers};

/// Timing of one `add_file`.
#[derive(Debug, Clone, Default)]
pub struct AddReport {
    pub file: FileId,
    pub encrypt: Duration,
    pub index: Duration,
    /// Words newly recorded for the file
    pub words: usize,
    /// Words of an earlier version that no longer occur
    pub retracted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveReport {
    pub file: FileId,
    /// false when the server held no copy (nothing retracted)
    pub found: bool,
    pub words: usize,
    pub elapsed: Duration,
}

pub struct Indexer<S: TableStore> {
    scheme: Arc<Scheme<S>>,
    vault: FileVault,
    client_root: PathBuf,
    staging_dir: PathBuf,
    min_word_length: usize,
}

impl Indexer<OpendalTables> {
    /// Build the store from config, make sure its tables exist and unlock the
    /// master key from `passphrase`.
    pub async fn open(cfg: &ParsecConfig, passphrase: &SecretString) -> ParsecResult<Self> {
        cfg.validate()?;
        let op = build_from_core_config(&cfg.storage)?;
        let tables = Arc::new(OpendalTables::new(op.clone()));
        let key = unlock(&*tables, passphrase, &kdf_params(&cfg.crypto)).await?;

        let scheme = Scheme::new(tables, key, cfg.index.variant(), cfg.index.adjacency);
        scheme.ensure_tables().await?;
        info!(
            variant = %scheme.variant(),
            adjacency = scheme.adjacency(),
            backend = ?cfg.storage.backend,
            "index opened"
        );
        Ok(Self::new(Arc::new(scheme), FileVault::new(op), cfg))
    }

    /// Master key for another passphrase against this store's salt.
    pub async fn derive_key(
        &self,
        cfg: &ParsecConfig,
        passphrase: &SecretString,
    ) -> ParsecResult<MasterKey> {
        unlock(&**self.scheme.store(), passphrase, &kdf_params(&cfg.crypto)).await
    }
}

impl<S: TableStore> Indexer<S> {
    pub fn new(scheme: Arc<Scheme<S>>, vault: FileVault, cfg: &ParsecConfig) -> Self {
        Self {
            scheme,
            vault,
            client_root: cfg.watch.client_root.clone(),
            staging_dir: cfg.watch.staging_dir.clone(),
            min_word_length: cfg.index.min_word_length,
        }
    }

    pub fn scheme(&self) -> &Arc<Scheme<S>> {
        &self.scheme
    }

    pub fn vault(&self) -> &FileVault {
        &self.vault
    }

    /// Identifier of `path`: relative to the client root when inside it,
    /// otherwise the bare file name.
    pub fn file_id(&self, path: &Path) -> FileId {
        let rel = path
            .strip_prefix(&self.client_root)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.file_name().map(PathBuf::from).unwrap_or_default());
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Store an encrypted copy of the file, then index its words.
    ///
    /// When the server already holds a copy (the file was edited), only the
    /// difference is indexed: words that dropped out are tombstoned and words
    /// already recorded are left alone. If indexing fails the previous copy
    /// is put back, so a retry diffs against what the index holds.
    pub async fn add_file(&self, path: &Path) -> ParsecResult<AddReport> {
        let file = self.file_id(path);
        let bytes = tokio::fs::read(path).await?;
        let text = text_of(bytes)?;
        let key = self.scheme.key_snapshot().await;

        let started = Instant::now();
        let previous = self.vault.fetch(&key, &file).await?;
        self.vault.store(&key, &file, text.as_bytes()).await?;
        let encrypt = started.elapsed();

        let started = Instant::now();
        let words = extract_words(&text, self.min_word_length);
        let old_words = match &previous {
            Some(old) => extract_words(&text_of(old.clone())?, self.min_word_length).followers,
            None => Followers::new(),
        };
        let (retract, add) = word_changes(&old_words, &words.followers, self.scheme.adjacency());
        if let Err(err) = self.scheme.update_words(&file, &retract, &add).await {
            self.restore_copy(&key, &file, previous.as_deref()).await;
            return Err(err);
        }
        let index = started.elapsed();

        info!(
            encrypt_ms = encrypt.as_millis() as u64,
            index_ms = index.as_millis() as u64,
            words = add.len(),
            retracted = retract.len(),
            "file added"
        );
        Ok(AddReport {
            file,
            encrypt,
            index,
            words: add.len(),
            retracted: retract.len(),
        })
    }

    async fn restore_copy(&self, key: &MasterKey, file: &str, previous: Option<&[u8]>) {
        let restored = match previous {
            Some(old) => self.vault.store(key, file, old).await,
            None => self.vault.delete(key, file).await,
        };
        if let Err(err) = restored {
            warn!(error = %err, "could not restore the previous server copy");
        }
    }

    /// Retract a file: decrypt its server copy into the staging directory,
    /// recompute its words, tombstone each, then delete the copy.
    pub async fn remove_file(&self, path: &Path) -> ParsecResult<RemoveReport> {
        let started = Instant::now();
        let file = self.file_id(path);
        let key = self.scheme.key_snapshot().await;

        let Some(contents) = self.vault.fetch(&key, &file).await? else {
            warn!("no server copy to retract");
            return Ok(RemoveReport {
                file,
                found: false,
                words: 0,
                elapsed: started.elapsed(),
            });
        };

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let mut staged = tempfile::Builder::new()
            .prefix(".parsec-staging-")
            .tempfile_in(&self.staging_dir)?;
        staged.write_all(&contents)?;
        staged.flush()?;
        debug!(staged = %staged.path().display(), "server copy staged");

        let words = file_words(staged.path(), self.min_word_length).await?;
        let retracted = self.scheme.remove_words(&file, words.words()).await?;
        self.vault.delete(&key, &file).await?;

        info!(words = retracted, "file removed");
        Ok(RemoveReport {
            file,
            found: true,
            words: retracted,
            elapsed: started.elapsed(),
        })
    }

    pub async fn search(&self, query: &Query) -> ParsecResult<BTreeSet<FileId>> {
        evaluate(&self.scheme, query).await
    }

    /// Decrypted server copy of an indexed file.
    pub async fn show(&self, file: &str) -> ParsecResult<Option<Vec<u8>>> {
        let key = self.scheme.key_snapshot().await;
        self.vault.fetch(&key, file).await
    }

    /// Merge the index; when rotating, re-encrypt the file copies afterwards.
    pub async fn merge(
        &self,
        new_key: Option<MasterKey>,
        progress: Option<&ProgressFn>,
    ) -> ParsecResult<MergeReport> {
        let old_key = self.scheme.key_snapshot().await;
        let report = self.scheme.merge(new_key, progress).await?;
        if report.rotated {
            let new_key = self.scheme.key_snapshot().await;
            if new_key != old_key {
                self.vault.rekey(&old_key, &new_key, progress).await?;
            }
        }
        Ok(report)
    }

    /// Empty the index and the file copies. Client files are untouched.
    pub async fn reset(&self) -> ParsecResult<()> {
        self.scheme.reset().await?;
        self.vault.clear().await
    }

    pub async fn status(&self) -> ParsecResult<IndexStatus> {
        self.scheme.status().await
    }

    /// Files with a stored copy, readable under the current key.
    pub async fn files(&self) -> ParsecResult<Vec<FileId>> {
        let key = self.scheme.key_snapshot().await;
        self.vault.list(&key).await
    }
}

/// Postings that move one file's index entries from `old` to `new`: the
/// words to tombstone and the words to record. In adjacency mode a word whose
/// followers changed is both, so its follower set is replaced.
fn word_changes(old: &Followers, new: &Followers, adjacency: bool) -> (Vec<String>, Followers) {
    let mut retract: Vec<String> = old
        .keys()
        .filter(|word| !new.contains_key(*word))
        .cloned()
        .collect();
    let mut add = Followers::new();
    for (word, next) in new {
        match old.get(word) {
            None => {}
            Some(prev) if adjacency && prev != next => retract.push(word.clone()),
            Some(_) => continue,
        }
        add.insert(word.clone(), next.clone());
    }
    (retract, add)
}
