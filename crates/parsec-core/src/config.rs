use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ParsecError, ParsecResult};
use crate::types::{BackendKind, Variant, VariantKind};

/// Top-level configuration (loaded from parsec.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsecConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub watch: WatchConfig,
    pub crypto: CryptoConfig,
}

impl ParsecConfig {
    /// Reject values that would make the index unusable.
    pub fn validate(&self) -> ParsecResult<()> {
        if self.index.variant == VariantKind::PackPlus && self.index.bucket_size == 0 {
            return Err(ParsecError::Config(
                "index.bucket_size must be at least 1 for pack_plus".into(),
            ));
        }
        if self.index.min_word_length == 0 {
            return Err(ParsecError::Config(
                "index.min_word_length must be at least 1".into(),
            ));
        }
        if self.daemon.queue_depth == 0 {
            return Err(ParsecError::Config(
                "daemon.queue_depth must be at least 1".into(),
            ));
        }
        for pattern in &self.watch.protected_patterns {
            if pattern.trim().is_empty() {
                return Err(ParsecError::Config(
                    "watch.protected_patterns contains an empty pattern".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Prometheus metrics endpoint (default: 127.0.0.1:9184)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Indexing worker count (0 = cpu_count)
    pub workers: usize,
    /// Pending file events before the watcher blocks
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint (s3 backend only)
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name (s3 backend only)
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Scheme flavour: base, base_plus, or pack_plus
    pub variant: VariantKind,
    /// File identifiers per merged entry (pack_plus only)
    pub bucket_size: usize,
    /// Record following words for phrase search
    pub adjacency: bool,
    /// Shortest word that gets indexed
    pub min_word_length: usize,
}

impl IndexConfig {
    pub fn variant(&self) -> Variant {
        self.variant.with_bucket_size(self.bucket_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory whose new files get indexed
    pub client_root: PathBuf,
    /// Where server copies are decrypted before their words are retracted
    pub staging_dir: PathBuf,
    /// Glob patterns (matched against the file name) never indexed
    pub protected_patterns: Vec<String>,
}

/// Master key derivation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("127.0.0.1:9184".into()),
            log_level: "info".into(),
            log_format: "text".into(),
            workers: 0,
            queue_depth: 256,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fs,
            root: PathBuf::from("data/server"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "parsec".into(),
            enforce_tls: false,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            variant: VariantKind::PackPlus,
            bucket_size: 100,
            adjacency: false,
            min_word_length: 2,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            client_root: PathBuf::from("data/client"),
            staging_dir: PathBuf::from("data/staging"),
            protected_patterns: vec![
                ".parsec-staging-*".into(),
                "*.swp".into(),
                "*~".into(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
log_level = "debug"
log_format = "json"
workers = 4
queue_depth = 32

[storage]
backend = "s3"
endpoint = "https://s3.example.com:8333"
region = "us-west-2"
bucket = "my-bucket"
enforce_tls = true

[index]
variant = "pack_plus"
bucket_size = 8
adjacency = true
min_word_length = 3

[watch]
client_root = "/srv/docs"
staging_dir = "/var/tmp/parsec"
protected_patterns = ["*.lock"]

[crypto]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8
"#;
        let config: ParsecConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.daemon.workers, 4);
        assert_eq!(config.storage.backend, BackendKind::S3);
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.bucket, "my-bucket");
        assert_eq!(config.index.variant(), Variant::PackPlus { bucket_size: 8 });
        assert!(config.index.adjacency);
        assert_eq!(config.watch.client_root, PathBuf::from("/srv/docs"));
        assert_eq!(config.watch.protected_patterns, vec!["*.lock".to_string()]);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 131072);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: ParsecConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.queue_depth, 256);
        assert_eq!(config.storage.backend, BackendKind::Fs);
        assert_eq!(config.index.variant(), Variant::PackPlus { bucket_size: 100 });
        assert!(!config.index.adjacency);
        assert_eq!(config.index.min_word_length, 2);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 65536);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[index]
variant = "base_plus"
"#;
        let config: ParsecConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.index.variant(), Variant::BasePlus);
        // Defaults
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_bucket() {
        let mut config = ParsecConfig::default();
        config.index.bucket_size = 0;
        assert!(matches!(config.validate(), Err(ParsecError::Config(_))));

        config.index.variant = VariantKind::BasePlus;
        config.validate().unwrap();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ParsecConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ParsecConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.root, parsed.storage.root);
        assert_eq!(config.index.bucket_size, parsed.index.bucket_size);
        assert_eq!(config.watch.protected_patterns, parsed.watch.protected_patterns);
    }
}
