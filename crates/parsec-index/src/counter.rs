//! Per-table counter state: word → next free counter.
//!
//! Each map is a JSON object sealed with XChaCha20-Poly1305 under the counter
//! key (HKDF of the master key) and stored in the meta table as
//! `"<table>_count"`. The blob name is the AAD, so the `edb` map cannot be
//! swapped in for the `edb2` one.
//!
//! Loading distinguishes three cases and never conflates them:
//!   - no blob: a fresh table, the empty map;
//!   - blob that does not authenticate: [`ParsecError::Decryption`];
//!   - authenticated blob that does not parse: [`ParsecError::CounterStateCorrupt`].

use std::collections::BTreeMap;

use parsec_core::types::META_TABLE;
use parsec_core::{ParsecError, ParsecResult};
use parsec_crypto::{derive_counter_key, open, seal, AeadError, MasterKey};
use parsec_storage::TableStore;
use tracing::debug;

pub type CounterMap = BTreeMap<String, u64>;

/// Meta-table name of a table's counter blob.
pub fn counter_blob_name(table: &str) -> String {
    format!("{table}_count")
}

/// Load the counter map of `table`, sealed under `key`.
pub async fn load_counts<S: TableStore>(
    store: &S,
    table: &str,
    key: &MasterKey,
) -> ParsecResult<CounterMap> {
    let name = counter_blob_name(table);
    let Some(plain) = read_sealed(store, &name, key).await? else {
        debug!(table, "no counter state, starting empty");
        return Ok(CounterMap::new());
    };
    serde_json::from_slice(&plain).map_err(|e| ParsecError::CounterStateCorrupt {
        name,
        reason: e.to_string(),
    })
}

/// Seal `counts` under `key` and overwrite the counter blob of `table`.
pub async fn save_counts<S: TableStore>(
    store: &S,
    table: &str,
    counts: &CounterMap,
    key: &MasterKey,
) -> ParsecResult<()> {
    let plain = serde_json::to_vec(counts)
        .map_err(|e| ParsecError::Codec(format!("serializing counters: {e}")))?;
    write_sealed(store, &counter_blob_name(table), &plain, key).await?;
    debug!(table, words = counts.len(), "counter state persisted");
    Ok(())
}

/// Read and open a meta-table blob sealed under the counter key.
pub(crate) async fn read_sealed<S: TableStore>(
    store: &S,
    name: &str,
    key: &MasterKey,
) -> ParsecResult<Option<Vec<u8>>> {
    let Some(sealed) = store.get_exact(META_TABLE, name.as_bytes()).await? else {
        return Ok(None);
    };
    let counter_key = derive_counter_key(key)?;
    match open(&counter_key, &sealed, name.as_bytes()) {
        Ok(plain) => Ok(Some(plain)),
        Err(AeadError::Authentication | AeadError::Truncated { .. }) => {
            Err(ParsecError::decryption(name))
        }
        Err(e) => Err(ParsecError::Crypto(e.to_string())),
    }
}

/// Seal `plain` under the counter key and store it in the meta table.
pub(crate) async fn write_sealed<S: TableStore>(
    store: &S,
    name: &str,
    plain: &[u8],
    key: &MasterKey,
) -> ParsecResult<()> {
    let counter_key = derive_counter_key(key)?;
    let sealed = seal(&counter_key, plain, name.as_bytes())
        .map_err(|e| ParsecError::Crypto(e.to_string()))?;
    store.put(META_TABLE, name.as_bytes(), sealed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsec_core::types::{EDB, EDB2};
    use parsec_storage::{memory_operator, OpendalTables};

    fn store() -> OpendalTables {
        OpendalTables::new(memory_operator().unwrap())
    }

    fn key(byte: u8) -> MasterKey {
        MasterKey::from_bytes([byte; 32])
    }

    #[tokio::test]
    async fn test_absent_blob_is_empty_map() {
        let counts = load_counts(&store(), EDB2, &key(1)).await.unwrap();
        assert!(counts.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = store();
        let mut counts = CounterMap::new();
        counts.insert("lighthouse".into(), 2);
        counts.insert("keeper".into(), 1);
        save_counts(&store, EDB2, &counts, &key(1)).await.unwrap();

        assert_eq!(load_counts(&store, EDB2, &key(1)).await.unwrap(), counts);
        assert!(load_counts(&store, EDB, &key(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_key_is_decryption_failure() {
        let store = store();
        let counts = CounterMap::from([("w".to_string(), 1)]);
        save_counts(&store, EDB, &counts, &key(1)).await.unwrap();

        let err = load_counts(&store, EDB, &key(2)).await.unwrap_err();
        assert!(matches!(err, ParsecError::Decryption { context } if context == "edb_count"));
    }

    #[tokio::test]
    async fn test_blob_bound_to_its_name() {
        let store = store();
        save_counts(&store, EDB, &CounterMap::new(), &key(1)).await.unwrap();
        let sealed = store
            .get_exact(META_TABLE, b"edb_count")
            .await
            .unwrap()
            .unwrap();
        store.put(META_TABLE, b"edb2_count", sealed).await.unwrap();

        assert!(load_counts(&store, EDB2, &key(1))
            .await
            .unwrap_err()
            .is_decryption_failure());
    }

    #[tokio::test]
    async fn test_authenticated_garbage_is_corrupt_not_empty() {
        let store = store();
        write_sealed(&store, "edb2_count", b"not a map", &key(1))
            .await
            .unwrap();

        let err = load_counts(&store, EDB2, &key(1)).await.unwrap_err();
        assert!(matches!(err, ParsecError::CounterStateCorrupt { name, .. } if name == "edb2_count"));
    }
}
