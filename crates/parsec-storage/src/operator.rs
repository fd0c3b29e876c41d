//! OpenDAL Operator factory for the parsec table store and file vault

use std::path::Path;

use anyhow::{Context, Result};
use opendal::Operator;
use parsec_core::config::StorageConfig;
use parsec_core::types::BackendKind;

/// Credentials for S3-compatible backends
#[derive(Debug, Clone, Default)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Credentials {
    /// Read `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`. Missing values stay
    /// empty and let the backend fall back to its own credential chain.
    pub fn from_env() -> Self {
        Self {
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        }
    }
}

/// Local directory backend. The directory is created on first write.
pub fn fs_operator(root: &Path) -> Result<Operator> {
    let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL fs operator at {}", root.display()))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// Process-local backend; contents vanish with the operator.
pub fn memory_operator() -> Result<Operator> {
    let op = Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish();
    Ok(op)
}

/// S3-compatible backend with path-style addressing (the opendal default,
/// which SeaweedFS and MinIO require).
pub fn s3_operator(storage: &StorageConfig, creds: &S3Credentials) -> Result<Operator> {
    let mut builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket);
    if !creds.access_key_id.is_empty() {
        builder = builder
            .access_key_id(&creds.access_key_id)
            .secret_access_key(&creds.secret_access_key);
    }

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// Build the operator selected by `storage.backend`.
///
/// For S3, if `enforce_tls` is true and the endpoint uses HTTP, this returns
/// an error. Otherwise a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(storage: &StorageConfig) -> Result<Operator> {
    match storage.backend {
        BackendKind::Fs => fs_operator(&storage.root),
        BackendKind::Memory => memory_operator(),
        BackendKind::S3 => {
            if storage.endpoint.starts_with("http://") {
                if storage.enforce_tls {
                    anyhow::bail!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        storage.endpoint
                    );
                }
                tracing::warn!(
                    endpoint = %storage.endpoint,
                    "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
                );
            }
            s3_operator(storage, &S3Credentials::from_env())
        }
    }
}
