//! Passphrase → master key, with the Argon2id salt kept beside the index.

use parsec_core::config::CryptoConfig;
use parsec_core::types::META_TABLE;
use parsec_core::{ParsecError, ParsecResult};
use parsec_crypto::{derive_master_key, generate_salt, KdfParams, MasterKey, SALT_SIZE};
use parsec_storage::TableStore;
use secrecy::SecretString;
use tracing::info;

/// Meta-table row holding the plaintext KDF salt.
pub const KDF_SALT: &str = "kdf_salt";

pub fn kdf_params(cfg: &CryptoConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: cfg.argon2_mem_cost_kib,
        time_cost: cfg.argon2_time_cost,
        parallelism: cfg.argon2_parallelism,
    }
}

/// The store's KDF salt, generated and persisted on first use.
pub async fn load_or_create_salt<S: TableStore>(store: &S) -> ParsecResult<[u8; SALT_SIZE]> {
    if let Some(stored) = store.get_exact(META_TABLE, KDF_SALT.as_bytes()).await? {
        return <[u8; SALT_SIZE]>::try_from(stored.as_slice()).map_err(|_| {
            ParsecError::Codec(format!(
                "{KDF_SALT} is {} bytes, expected {SALT_SIZE}",
                stored.len()
            ))
        });
    }
    let salt = generate_salt();
    store
        .put(META_TABLE, KDF_SALT.as_bytes(), salt.to_vec())
        .await?;
    info!("generated new key-derivation salt");
    Ok(salt)
}

/// Derive the master key for `passphrase` against this store's salt.
pub async fn unlock<S: TableStore>(
    store: &S,
    passphrase: &SecretString,
    params: &KdfParams,
) -> ParsecResult<MasterKey> {
    let salt = load_or_create_salt(store).await?;
    let key = derive_master_key(passphrase, &salt, params)
        .map_err(|e| ParsecError::Crypto(e.to_string()))?;
    info!(fingerprint = %key.fingerprint(), "master key unlocked");
    Ok(key)
}
