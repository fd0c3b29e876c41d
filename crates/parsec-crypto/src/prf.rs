//! Keyed BLAKE3 as the pseudorandom function.

use crate::{KEY_SIZE, PRF_SIZE};

/// `PRF(key, message)`, 32 bytes.
pub fn prf(key: &[u8; KEY_SIZE], message: &[u8]) -> [u8; PRF_SIZE] {
    *blake3::keyed_hash(key, message).as_bytes()
}
