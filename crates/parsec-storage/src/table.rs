//! Table store contract and its OpenDAL implementation
//!
//! A table maps opaque byte keys to opaque byte values. The scheme issues
//! only exact-match lookups, so no ordering or range scan is required of a
//! backend.

use std::future::Future;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use opendal::{ErrorKind, Operator};
use parsec_core::{ParsecError, ParsecResult};
use tracing::{debug, warn};

/// Key-value tables on the untrusted side.
///
/// Implementations must be cheap to share across tasks; every method may be
/// called concurrently. Failures map to [`ParsecError::StoreUnavailable`] and
/// are never retried here.
pub trait TableStore: Send + Sync + 'static {
    /// Create `table` if it does not exist. Columns are fixed: `token` (key)
    /// and `file` (value).
    fn create(&self, table: &str) -> impl Future<Output = ParsecResult<()>> + Send;

    /// Ensure exact lookups on `column` are efficient.
    ///
    /// Key-value backends are natively keyed on the token column, so the
    /// default does nothing.
    fn create_index(
        &self,
        table: &str,
        column: &str,
    ) -> impl Future<Output = ParsecResult<()>> + Send {
        debug!(table, column, "exact-match index is native to the backend");
        async { Ok(()) }
    }

    /// Remove `table` and everything in it. Dropping a missing table is not
    /// an error.
    fn drop_table(&self, table: &str) -> impl Future<Output = ParsecResult<()>> + Send;

    /// Delete every row of `table`, keeping the table.
    fn truncate(&self, table: &str) -> impl Future<Output = ParsecResult<()>> + Send;

    /// Insert or overwrite the row at `key`.
    fn put(
        &self,
        table: &str,
        key: &[u8],
        value: Vec<u8>,
    ) -> impl Future<Output = ParsecResult<()>> + Send;

    /// Fetch the row at exactly `key`; `None` when absent.
    fn get_exact(
        &self,
        table: &str,
        key: &[u8],
    ) -> impl Future<Output = ParsecResult<Option<Vec<u8>>>> + Send;

    /// Delete the row at `key` if present.
    fn remove(&self, table: &str, key: &[u8]) -> impl Future<Output = ParsecResult<()>> + Send;
}

/// Delete every object under `dir`, then `dir` itself. Returns the number of
/// objects deleted; a missing directory deletes nothing.
pub async fn remove_tree(op: &Operator, dir: &str) -> opendal::Result<usize> {
    let entries = match op.list_with(dir).recursive(true).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries.iter().filter(|e| !e.path().ends_with('/')) {
        op.delete(entry.path()).await?;
        removed += 1;
    }
    match op.delete(dir).await {
        Ok(()) => Ok(removed),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(removed),
        Err(e) => Err(e),
    }
}

/// Tables as directories of an OpenDAL operator, one object per row named by
/// the base64url encoding of its key.
#[derive(Debug, Clone)]
pub struct OpendalTables {
    op: Operator,
}

impl OpendalTables {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn dir(table: &str) -> String {
        format!("{table}/")
    }

    fn row_path(table: &str, key: &[u8]) -> String {
        format!("{table}/{}", URL_SAFE_NO_PAD.encode(key))
    }
}

impl TableStore for OpendalTables {
    async fn create(&self, table: &str) -> ParsecResult<()> {
        if self.op.info().full_capability().create_dir {
            self.op
                .create_dir(&Self::dir(table))
                .await
                .map_err(|e| ParsecError::store(format!("create table '{table}': {e}")))?;
        }
        debug!(table, "table ready");
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> ParsecResult<()> {
        let removed = remove_tree(&self.op, &Self::dir(table))
            .await
            .map_err(|e| ParsecError::store(format!("drop table '{table}': {e}")))?;
        if removed == 0 {
            warn!(table, "dropped empty or nonexistent table");
        } else {
            debug!(table, rows = removed, "table dropped");
        }
        Ok(())
    }

    async fn truncate(&self, table: &str) -> ParsecResult<()> {
        self.drop_table(table).await?;
        self.create(table).await?;
        debug!(table, "table truncated");
        Ok(())
    }

    async fn put(&self, table: &str, key: &[u8], value: Vec<u8>) -> ParsecResult<()> {
        self.op
            .write(&Self::row_path(table, key), value)
            .await
            .map(|_| ())
            .map_err(|e| ParsecError::store(format!("put into '{table}': {e}")))
    }

    async fn get_exact(&self, table: &str, key: &[u8]) -> ParsecResult<Option<Vec<u8>>> {
        match self.op.read(&Self::row_path(table, key)).await {
            Ok(buf) => Ok(Some(buf.to_vec())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ParsecError::store(format!("get from '{table}': {e}"))),
        }
    }

    async fn remove(&self, table: &str, key: &[u8]) -> ParsecResult<()> {
        self.op
            .delete(&Self::row_path(table, key))
            .await
            .map_err(|e| ParsecError::store(format!("remove from '{table}': {e}")))
    }
}
