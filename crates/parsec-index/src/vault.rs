//! Encrypted server-side copies of indexed files.
//!
//! Layout in the operator:
//! ```text
//! files/{AES-SIV(name_key, relative path) as base64url}
//! ```
//! Object bodies are sealed with XChaCha20-Poly1305 under the file key, with
//! the object name as AAD. Both keys are HKDF domains of the master key, so a
//! key rotation re-encrypts names and bodies alike.

use opendal::{ErrorKind, Operator};
use parsec_core::{ParsecError, ParsecResult};
use parsec_crypto::{
    decrypt_name, derive_file_key, derive_name_key, encrypt_name, open, seal, AeadError,
    MasterKey,
};
use parsec_storage::remove_tree;
use tracing::{debug, info, warn};

use crate::merge::ProgressFn;

const PREFIX: &str = "files/";

#[derive(Debug, Clone)]
pub struct FileVault {
    op: Operator,
}

impl FileVault {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    fn object_path(key: &MasterKey, rel_path: &str) -> ParsecResult<String> {
        let name_key = derive_name_key(key)?;
        Ok(format!("{PREFIX}{}", encrypt_name(&name_key, rel_path)?))
    }

    /// Encrypt `contents` and store it as the copy of `rel_path`.
    pub async fn store(&self, key: &MasterKey, rel_path: &str, contents: &[u8]) -> ParsecResult<()> {
        let object = Self::object_path(key, rel_path)?;
        let file_key = derive_file_key(key)?;
        let sealed = seal(&file_key, contents, object.as_bytes())
            .map_err(|e| ParsecError::Crypto(e.to_string()))?;
        let size = sealed.len();
        self.op
            .write(&object, sealed)
            .await
            .map(|_| ())
            .map_err(|e| ParsecError::store(format!("writing {object}: {e}")))?;
        debug!(bytes = size, "file copy stored");
        Ok(())
    }

    /// Decrypt the copy of `rel_path`; `None` if there is none.
    pub async fn fetch(&self, key: &MasterKey, rel_path: &str) -> ParsecResult<Option<Vec<u8>>> {
        let object = Self::object_path(key, rel_path)?;
        let sealed = match self.op.read(&object).await {
            Ok(buf) => buf.to_vec(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ParsecError::store(format!("reading {object}: {e}"))),
        };
        let file_key = derive_file_key(key)?;
        open_object(&file_key, &sealed, &object).map(Some)
    }

    pub async fn delete(&self, key: &MasterKey, rel_path: &str) -> ParsecResult<()> {
        let object = Self::object_path(key, rel_path)?;
        self.op
            .delete(&object)
            .await
            .map_err(|e| ParsecError::store(format!("deleting {object}: {e}")))
    }

    /// Relative paths of all stored copies readable under `key`.
    pub async fn list(&self, key: &MasterKey) -> ParsecResult<Vec<String>> {
        let name_key = derive_name_key(key)?;
        let mut names = Vec::new();
        for object in self.objects().await? {
            let encoded = &object[PREFIX.len()..];
            match decrypt_name(&name_key, encoded) {
                Ok(name) => names.push(name),
                Err(_) => warn!(object = %object, "skipping object not readable under this key"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Re-encrypt every copy from `old` to `new`. Objects already under `new`
    /// (from an earlier, interrupted run) are left alone. Returns the number
    /// of objects rewritten.
    pub async fn rekey(
        &self,
        old: &MasterKey,
        new: &MasterKey,
        progress: Option<&ProgressFn>,
    ) -> ParsecResult<usize> {
        let old_names = derive_name_key(old)?;
        let new_names = derive_name_key(new)?;
        let old_files = derive_file_key(old)?;
        let new_files = derive_file_key(new)?;

        let objects = self.objects().await?;
        let total = objects.len() as u64;
        let mut rewritten = 0;

        for (done, object) in objects.iter().enumerate() {
            let encoded = &object[PREFIX.len()..];
            let rel_path = match decrypt_name(&old_names, encoded) {
                Ok(name) => name,
                Err(_) if decrypt_name(&new_names, encoded).is_ok() => continue,
                Err(_) => return Err(ParsecError::decryption(format!("vault object {object}"))),
            };

            let sealed = self
                .op
                .read(object)
                .await
                .map_err(|e| ParsecError::store(format!("reading {object}: {e}")))?
                .to_vec();
            let contents = open_object(&old_files, &sealed, object)?;

            let target = format!("{PREFIX}{}", encrypt_name(&new_names, &rel_path)?);
            let resealed = seal(&new_files, &contents, target.as_bytes())
                .map_err(|e| ParsecError::Crypto(e.to_string()))?;
            self.op
                .write(&target, resealed)
                .await
                .map(|_| ())
                .map_err(|e| ParsecError::store(format!("writing {target}: {e}")))?;
            self.op
                .delete(object)
                .await
                .map_err(|e| ParsecError::store(format!("deleting {object}: {e}")))?;

            rewritten += 1;
            if let Some(cb) = progress {
                cb(done as u64 + 1, total, "re-encrypting files");
            }
        }

        info!(objects = rewritten, "file copies re-encrypted");
        Ok(rewritten)
    }

    /// Remove every stored copy.
    pub async fn clear(&self) -> ParsecResult<()> {
        let removed = remove_tree(&self.op, PREFIX)
            .await
            .map_err(|e| ParsecError::store(format!("clearing {PREFIX}: {e}")))?;
        info!(objects = removed, "file copies cleared");
        Ok(())
    }

    async fn objects(&self) -> ParsecResult<Vec<String>> {
        let entries = match self.op.list_with(PREFIX).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ParsecError::store(format!("listing {PREFIX}: {e}"))),
        };
        Ok(entries
            .into_iter()
            .map(|entry| entry.path().to_string())
            .filter(|path| path.len() > PREFIX.len() && !path.ends_with('/'))
            .collect())
    }
}

fn open_object(file_key: &[u8; 32], sealed: &[u8], object: &str) -> ParsecResult<Vec<u8>> {
    open(file_key, sealed, object.as_bytes()).map_err(|e| match e {
        AeadError::Authentication | AeadError::Truncated { .. } => {
            ParsecError::decryption(format!("vault object {object}"))
        }
        other => ParsecError::Crypto(other.to_string()),
    })
}
