//! AES-SIV object-name encryption
//!
//! Server-side file copies must be addressable again from their plaintext
//! path, so names are encrypted deterministically: the same path and key
//! always give the same object name. SIV keeps the name authenticated and
//! lets a key rotation decrypt every name and re-encrypt it under the new key.

use aes_siv::{
    aead::{Aead, KeyInit},
    Aes256SivAead, Nonce,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use zeroize::Zeroizing;

use crate::KEY_SIZE;

/// Encrypt a relative path into a storage-safe object name (base64url).
///
/// `name_key` comes from [`crate::derive_name_key`].
pub fn encrypt_name(name_key: &[u8; KEY_SIZE], plaintext_name: &str) -> anyhow::Result<String> {
    let cipher = siv_cipher(name_key)?;
    // AES-SIV uses a zero nonce for deterministic encryption
    let nonce = Nonce::default();

    let ciphertext = cipher
        .encrypt(&nonce, plaintext_name.as_bytes())
        .map_err(|e| anyhow::anyhow!("name encryption failed: {e}"))?;

    Ok(URL_SAFE_NO_PAD.encode(ciphertext))
}

/// Decrypt an object name produced by [`encrypt_name`].
pub fn decrypt_name(name_key: &[u8; KEY_SIZE], encrypted: &str) -> anyhow::Result<String> {
    let ciphertext = URL_SAFE_NO_PAD
        .decode(encrypted)
        .map_err(|e| anyhow::anyhow!("object name is not base64url: {e}"))?;

    let cipher = siv_cipher(name_key)?;
    let nonce = Nonce::default();

    let plaintext = cipher
        .decrypt(&nonce, ciphertext.as_ref())
        .map_err(|_| anyhow::anyhow!("name decryption failed: wrong key or corrupted data"))?;

    String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("decrypted name is not UTF-8: {e}"))
}

fn siv_cipher(name_key: &[u8; KEY_SIZE]) -> anyhow::Result<Aes256SivAead> {
    // AES-256-SIV requires a 64-byte key (two 32-byte sub-keys)
    let mut double_key = Zeroizing::new([0u8; 64]);
    let hkdf = hkdf::Hkdf::<sha2::Sha256>::new(None, name_key);
    hkdf.expand(b"parsec-name-aes-siv", &mut double_key[..])
        .map_err(|e| anyhow::anyhow!("HKDF expand for AES-SIV: {e}"))?;
    Ok(Aes256SivAead::new((&*double_key).into()))
}
