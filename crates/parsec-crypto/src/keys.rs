//! Domain sub-keys derived from the master key via HKDF-SHA256.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::kdf::MasterKey;
use crate::KEY_SIZE;

pub type SubKey = Zeroizing<[u8; KEY_SIZE]>;

/// Key sealing the persisted counter maps and the merge journal.
pub fn derive_counter_key(master: &MasterKey) -> anyhow::Result<SubKey> {
    hkdf_derive(master.as_bytes(), b"parsec-counters")
}

/// Key sealing server-side file copies.
pub fn derive_file_key(master: &MasterKey) -> anyhow::Result<SubKey> {
    hkdf_derive(master.as_bytes(), b"parsec-files")
}

/// Key for deterministic encryption of server-side object names.
pub fn derive_name_key(master: &MasterKey) -> anyhow::Result<SubKey> {
    hkdf_derive(master.as_bytes(), b"parsec-names")
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
pub(crate) fn hkdf_derive(ikm: &[u8], info: &[u8]) -> anyhow::Result<SubKey> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_hkdf_derive_different_domains() {
        let master = test_master_key();
        let counters = derive_counter_key(&master).unwrap();
        let files = derive_file_key(&master).unwrap();
        let names = derive_name_key(&master).unwrap();

        assert_ne!(*counters, *files, "different domains must produce different keys");
        assert_ne!(*files, *names);
        assert_ne!(*counters, *names);
    }

    #[test]
    fn test_sub_keys_follow_master() {
        let a = derive_counter_key(&MasterKey::from_bytes([1u8; KEY_SIZE])).unwrap();
        let b = derive_counter_key(&MasterKey::from_bytes([2u8; KEY_SIZE])).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_sub_key_not_master() {
        let master = test_master_key();
        let counters = derive_counter_key(&master).unwrap();
        assert_ne!(&*counters, master.as_bytes());
    }
}
