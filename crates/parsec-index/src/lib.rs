//! parsec-index: the dynamic searchable-encryption index
//!
//! Layers, leaf first:
//!   - `counter`: sealed word → next-counter maps, one per table
//!   - `posting` / `entry`: the versioned posting codec and one-row reads/writes
//!   - `scheme` / `merge`: the two-table state machine and compaction
//!   - `query`: AND / OR / phrase evaluation
//!   - `words`, `vault`, `indexer`, `watcher`: the file-level workflow

pub mod counter;
pub mod entry;
pub mod indexer;
pub mod merge;
pub mod posting;
pub mod query;
pub mod scheme;
pub mod unlock;
pub mod vault;
pub mod watcher;
pub mod words;

pub use indexer::{AddReport, Indexer, RemoveReport};
pub use merge::{MergeReport, ProgressFn};
pub use posting::{GroupEntry, Posting, PostingSet};
pub use query::{evaluate, Query, QueryMode};
pub use scheme::{IndexState, IndexStatus, Scheme};
pub use watcher::{watch_directory, FileEvent, ProtectedNames};
