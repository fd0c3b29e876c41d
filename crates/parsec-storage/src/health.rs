//! Readiness of the table store
//!
//! The store is ready once it answers and holds an initialised index: the
//! meta table has at least one row (the KDF salt is written on first unlock).

use anyhow::{bail, Result};
use opendal::Operator;
use parsec_core::types::META_TABLE;

pub async fn check_health(op: &Operator) -> Result<()> {
    let meta = format!("{META_TABLE}/");
    let entries = op
        .list(&meta)
        .await
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))?;
    // some backends list the directory itself
    if !entries.iter().any(|entry| entry.path() != meta) {
        bail!("table '{META_TABLE}' is empty; the index has not been opened against this store");
    }
    Ok(())
}
