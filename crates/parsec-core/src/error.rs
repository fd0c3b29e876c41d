use std::fmt;

use thiserror::Error;

pub type ParsecResult<T> = Result<T, ParsecError>;

/// Point in the merge protocol at which a failure happened.
///
/// Every stage listed here runs after the delta table was truncated, so a
/// failure leaves the index relying on the merge journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStage {
    Truncate,
    Rewrite,
    PersistCounters,
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeStage::Truncate => "truncate",
            MergeStage::Rewrite => "rewrite",
            MergeStage::PersistCounters => "persist-counters",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ParsecError {
    /// Ciphertext did not authenticate under the derived key.
    #[error("decryption failed for {context}: wrong key or corrupted data")]
    Decryption { context: String },

    #[error("counter state '{name}' is corrupt: {reason}")]
    CounterStateCorrupt { name: String, reason: String },

    #[error("query contains no words")]
    EmptyQuery,

    #[error("table store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("encoding error: {0}")]
    Codec(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Failure after the point of no return. The rewrite plan is journaled in
    /// the meta table; re-running `merge` with the same keys replays it.
    #[error(
        "merge interrupted at stage {stage} after truncation (journal kept, re-run merge to finish): {source}"
    )]
    MergeInterrupted {
        stage: MergeStage,
        #[source]
        source: Box<ParsecError>,
    },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParsecError {
    pub fn decryption(context: impl Into<String>) -> Self {
        ParsecError::Decryption {
            context: context.into(),
        }
    }

    pub fn store(err: impl fmt::Display) -> Self {
        ParsecError::StoreUnavailable(err.to_string())
    }

    /// True for authentication failures, including ones surfacing through an
    /// interrupted merge.
    pub fn is_decryption_failure(&self) -> bool {
        match self {
            ParsecError::Decryption { .. } => true,
            ParsecError::MergeInterrupted { source, .. } => source.is_decryption_failure(),
            _ => false,
        }
    }

    /// Store failures are retryable at the batch level by ingestion callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ParsecError::StoreUnavailable(_))
    }
}
