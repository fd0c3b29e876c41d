//! parsec-storage: the untrusted side of the index
//!
//! The scheme only needs a table-oriented key-value store with exact-match
//! lookups. [`TableStore`] is that contract; [`OpendalTables`] implements it
//! on any OpenDAL operator (local filesystem, in-memory, S3).

pub mod health;
pub mod operator;
pub mod table;

pub use health::check_health;
pub use operator::{build_from_core_config, memory_operator};
pub use table::{remove_tree, OpendalTables, TableStore};
