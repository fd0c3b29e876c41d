//! Search tokens: the per-(word, table) key pair.
//!
//! `k1` names entries, `k2` seals them. The table name is mixed in so the same
//! word yields unrelated tokens in `edb` and `edb2`.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdf::MasterKey;
use crate::prf::prf;
use crate::{KEY_SIZE, PRF_SIZE};

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Token {
    k1: [u8; KEY_SIZE],
    k2: [u8; KEY_SIZE],
}

impl Token {
    pub fn from_parts(k1: [u8; KEY_SIZE], k2: [u8; KEY_SIZE]) -> Self {
        Self { k1, k2 }
    }

    /// Entry-name key.
    pub fn k1(&self) -> &[u8; KEY_SIZE] {
        &self.k1
    }

    /// Entry-value key.
    pub fn k2(&self) -> &[u8; KEY_SIZE] {
        &self.k2
    }

    /// Name of the entry holding the `counter`-th posting: `PRF(k1, counter)`.
    pub fn entry_key(&self, counter: u64) -> [u8; PRF_SIZE] {
        prf(&self.k1, &counter.to_be_bytes())
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.k1 == other.k1 && self.k2 == other.k2
    }
}

impl Eq for Token {}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("k1", &"[REDACTED]")
            .field("k2", &"[REDACTED]")
            .finish()
    }
}

/// Derive the token for `word` in the table named `prefix`.
///
/// `k1 = PRF(key, prefix ‖ "1" ‖ word)`, `k2 = PRF(key, prefix ‖ "2" ‖ word)`,
/// with the prefix length-framed so no two (prefix, word) pairs share input.
pub fn tokenize(word: &str, prefix: &str, key: &MasterKey) -> Token {
    Token {
        k1: prf(key.as_bytes(), &token_input(prefix, b'1', word)),
        k2: prf(key.as_bytes(), &token_input(prefix, b'2', word)),
    }
}

fn token_input(prefix: &str, label: u8, word: &str) -> Vec<u8> {
    let mut input = Vec::with_capacity(4 + prefix.len() + 1 + word.len());
    input.extend_from_slice(&(prefix.len() as u32).to_be_bytes());
    input.extend_from_slice(prefix.as_bytes());
    input.push(label);
    input.extend_from_slice(word.as_bytes());
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(byte: u8) -> MasterKey {
        MasterKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_tokenize_deterministic() {
        let k = key(9);
        assert_eq!(tokenize("lighthouse", "edb", &k), tokenize("lighthouse", "edb", &k));
    }

    #[test]
    fn test_tables_get_independent_tokens() {
        let k = key(9);
        let stable = tokenize("lighthouse", "edb", &k);
        let delta = tokenize("lighthouse", "edb2", &k);
        assert_ne!(stable.k1(), delta.k1());
        assert_ne!(stable.k2(), delta.k2());
    }

    #[test]
    fn test_halves_differ() {
        let t = tokenize("lighthouse", "edb", &key(1));
        assert_ne!(t.k1(), t.k2());
    }

    #[test]
    fn test_prefix_boundary_does_not_collide() {
        // "edb" + "2" + "1x" must not alias "edb2" + "1" + "x".
        let k = key(3);
        let a = tokenize("1x", "edb", &k);
        let b = tokenize("x", "edb2", &k);
        assert_ne!(a.k2(), b.k1());
    }

    #[test]
    fn test_entry_keys_distinct_per_counter() {
        let t = tokenize("word", "edb", &key(5));
        assert_ne!(t.entry_key(0), t.entry_key(1));
        assert_eq!(t.entry_key(7), t.entry_key(7));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_rotation_changes_every_token(word in "[a-z]{2,12}", a in any::<u8>(), b in any::<u8>()) {
            prop_assume!(a != b);
            prop_assert_ne!(tokenize(&word, "edb", &key(a)), tokenize(&word, "edb", &key(b)));
        }
    }
}
