//! parsec-crypto: client-side primitives for the encrypted index
//!
//! Everything the untrusted store sees is produced here:
//!
//! ```text
//! Master Key (256-bit, Argon2id from passphrase)
//!   ├── Search tokens (per word + table prefix, keyed BLAKE3)
//!   │   ├── k1: entry names   PRF(k1, counter)
//!   │   └── k2: entry values  XChaCha20-Poly1305 (AAD = entry name)
//!   ├── Counter Key (HKDF, domain="parsec-counters")
//!   ├── File Key    (HKDF, domain="parsec-files")
//!   └── Name Key    (HKDF, domain="parsec-names", AES-SIV object names)
//! ```

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod names;
pub mod prf;
pub mod token;

pub use aead::{open, seal, AeadError};
pub use kdf::{derive_master_key, generate_salt, KdfParams, MasterKey};
pub use keys::{derive_counter_key, derive_file_key, derive_name_key};
pub use names::{decrypt_name, encrypt_name};
pub use prf::prf;
pub use token::{tokenize, Token};

/// Size of a master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a PRF output (entry names, token halves)
pub const PRF_SIZE: usize = 32;

/// Size of the Argon2id salt
pub const SALT_SIZE: usize = 16;
