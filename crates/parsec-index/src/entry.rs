//! Index reader/writer: one posting ↔ one encrypted row.
//!
//! Row name `PRF(k1, counter)`, row value `seal(k2, posting, aad = row name)`.

use futures::future::try_join_all;
use parsec_core::{ParsecError, ParsecResult};
use parsec_crypto::{open, seal, AeadError, Token};
use parsec_storage::TableStore;

use crate::posting::Posting;

/// Concurrent lookups issued per window of a bounded run.
pub const PIPELINE_DEPTH: u64 = 16;

/// Seal `posting` under `token.k2` and store it at counter `counter`.
///
/// Store failures propagate unchanged; retrying is the caller's decision.
pub async fn write_entry<S: TableStore>(
    store: &S,
    table: &str,
    token: &Token,
    counter: u64,
    posting: &Posting,
) -> ParsecResult<()> {
    let entry_key = token.entry_key(counter);
    let plain = posting.encode()?;
    let sealed =
        seal(token.k2(), &plain, &entry_key).map_err(|e| ParsecError::Crypto(e.to_string()))?;
    store.put(table, &entry_key, sealed).await
}

/// Fetch and open the posting at `counter`. `None` when no row exists, which
/// is how a run ends; a row that fails to open is an error.
pub async fn read_entry<S: TableStore>(
    store: &S,
    table: &str,
    token: &Token,
    counter: u64,
) -> ParsecResult<Option<Posting>> {
    let entry_key = token.entry_key(counter);
    let Some(sealed) = store.get_exact(table, &entry_key).await? else {
        return Ok(None);
    };
    let plain = open(token.k2(), &sealed, &entry_key).map_err(|e| match e {
        AeadError::Authentication | AeadError::Truncated { .. } => {
            ParsecError::decryption(format!("{table} entry {counter}"))
        }
        other => ParsecError::Crypto(other.to_string()),
    })?;
    Posting::decode(&plain).map(Some)
}

/// Postings at `start, start + 1, …` until the first absent row, or until
/// `max_count` postings were read.
///
/// Bounded runs are fetched in windows of [`PIPELINE_DEPTH`] concurrent
/// lookups; the result is the same as reading one counter at a time.
pub async fn search_run<S: TableStore>(
    store: &S,
    table: &str,
    token: &Token,
    start: u64,
    max_count: Option<u64>,
) -> ParsecResult<Vec<Posting>> {
    let mut postings = Vec::new();

    let Some(max) = max_count else {
        let mut counter = start;
        while let Some(posting) = read_entry(store, table, token, counter).await? {
            postings.push(posting);
            counter += 1;
        }
        return Ok(postings);
    };

    let end = start.saturating_add(max);
    let mut window_start = start;
    while window_start < end {
        let window_end = window_start.saturating_add(PIPELINE_DEPTH).min(end);
        let window = try_join_all(
            (window_start..window_end).map(|counter| read_entry(store, table, token, counter)),
        )
        .await?;
        for posting in window {
            match posting {
                Some(posting) => postings.push(posting),
                None => return Ok(postings),
            }
        }
        window_start = window_end;
    }
    Ok(postings)
}
