pub mod config;
pub mod error;
pub mod types;

pub use error::{MergeStage, ParsecError, ParsecResult};
pub use types::{FileId, Variant};
