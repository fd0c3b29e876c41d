//! XChaCha20-Poly1305 sealing for index entries, counter blobs, and file copies
//!
//! Sealed format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! Callers bind each ciphertext to where it is stored through the AAD (the
//! entry name for index rows, the blob name for counter maps), so a row moved
//! under another name fails to open.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AeadError {
    #[error("sealed data too short: {len} bytes (minimum {min})")]
    Truncated { len: usize, min: usize },

    #[error("authentication failed: wrong key or corrupted data")]
    Authentication,

    #[error("encryption failed: {0}")]
    Seal(String),
}

/// Seal `plaintext` under `key`, authenticating `aad` alongside it.
///
/// Returns: `[24-byte nonce][ciphertext][16-byte tag]`
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, AeadError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| AeadError::Seal(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Open the output of [`seal`]. Fails closed on any mismatch of key, data,
/// or `aad`.
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, AeadError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(AeadError::Truncated {
            len: sealed.len(),
            min: NONCE_SIZE + TAG_SIZE,
        });
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| AeadError::Authentication)
}
