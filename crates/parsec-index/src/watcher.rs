//! Directory watcher feeding file events into a bounded channel.
//!
//! The notify callback runs on the watcher's own thread and uses
//! `blocking_send`, so a full queue stalls event delivery instead of growing
//! memory.

use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parsec_core::{ParsecError, ParsecResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Removed(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Created(p) | FileEvent::Removed(p) => p,
        }
    }
}

/// File-name globs that are never indexed (staging files, editor swap files).
#[derive(Debug, Clone, Default)]
pub struct ProtectedNames {
    patterns: Vec<glob::Pattern>,
}

impl ProtectedNames {
    pub fn new(patterns: &[String]) -> ParsecResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| ParsecError::Config(format!("protected pattern '{p}': {e}")))
            })
            .collect::<ParsecResult<_>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.patterns.iter().any(|p| p.matches(name))
    }
}

/// Map a notify event to the file events the indexer cares about.
///
/// A file counts as created once its writer closes it or it is moved in;
/// a bare creation counts only if content is already there. A write-close of
/// a file that is already indexed re-indexes it as an edit. Directories and
/// protected names are skipped.
pub fn classify(event: &notify::Event, protected: &ProtectedNames) -> Vec<FileEvent> {
    let created = match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
            return Vec::new()
        }
        EventKind::Create(_) => Some(true),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(true),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(true),
        EventKind::Remove(_) => Some(false),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(false),
        _ => None,
    };
    let Some(created) = created else {
        return Vec::new();
    };

    let bare_create = matches!(event.kind, EventKind::Create(_));
    event
        .paths
        .iter()
        .filter(|path| !protected.matches(path))
        .filter_map(|path| {
            if !created {
                return Some(FileEvent::Removed(path.clone()));
            }
            let meta = std::fs::metadata(path).ok()?;
            if meta.is_dir() || (bare_create && meta.len() == 0) {
                return None;
            }
            Some(FileEvent::Created(path.clone()))
        })
        .collect()
}

/// Watch `root` recursively, forwarding classified events into `tx`.
///
/// Dropping the returned watcher stops delivery.
pub fn watch_directory(
    root: &Path,
    protected: ProtectedNames,
    tx: mpsc::Sender<FileEvent>,
) -> ParsecResult<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for file_event in classify(&event, &protected) {
                    debug!(event = ?file_event, "file event");
                    if tx.blocking_send(file_event).is_err() {
                        // receiver gone: daemon is shutting down
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "watch error"),
        },
        Config::default(),
    )
    .map_err(|e| ParsecError::Other(anyhow::anyhow!("creating file watcher: {e}")))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| ParsecError::Other(anyhow::anyhow!("watching {}: {e}", root.display())))?;

    info!(root = %root.display(), "watching for new files");
    Ok(watcher)
}
