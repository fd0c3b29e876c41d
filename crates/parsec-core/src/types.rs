use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an indexed file: its path relative to the watched root.
///
/// Only ever written to the store inside sealed postings.
pub type FileId = String;

/// Stable table: compacted, long-lived postings.
pub const EDB: &str = "edb";

/// Delta table: additions not yet merged.
pub const EDB2: &str = "edb2";

/// Reserved table for counter blobs, the KDF salt, and the merge journal.
pub const META_TABLE: &str = "parsec_meta";

/// Which flavour of the scheme an index runs.
///
/// `Base` keeps a single table. `BasePlus` adds the delta table and merges.
/// `PackPlus` is `BasePlus` with merged postings packed into buckets of
/// `bucket_size` file identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Base,
    BasePlus,
    PackPlus { bucket_size: usize },
}

impl Variant {
    /// Tables searched by this variant, stable table first.
    pub fn tables(&self) -> &'static [&'static str] {
        match self {
            Variant::Base => &[EDB],
            Variant::BasePlus | Variant::PackPlus { .. } => &[EDB, EDB2],
        }
    }

    /// Table receiving new postings.
    pub fn insert_table(&self) -> &'static str {
        match self {
            Variant::Base => EDB,
            Variant::BasePlus | Variant::PackPlus { .. } => EDB2,
        }
    }

    /// Identifiers per merged entry. `BasePlus` is `PackPlus` with `B = 1`.
    pub fn bucket_size(&self) -> usize {
        match self {
            Variant::Base | Variant::BasePlus => 1,
            Variant::PackPlus { bucket_size } => (*bucket_size).max(1),
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, Variant::PackPlus { .. })
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Base => f.write_str("base"),
            Variant::BasePlus => f.write_str("base+"),
            Variant::PackPlus { bucket_size } => write!(f, "pack+ (B={bucket_size})"),
        }
    }
}

/// Variant selector as written in `parsec.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Base,
    BasePlus,
    PackPlus,
}

impl VariantKind {
    pub fn with_bucket_size(self, bucket_size: usize) -> Variant {
        match self {
            VariantKind::Base => Variant::Base,
            VariantKind::BasePlus => Variant::BasePlus,
            VariantKind::PackPlus => Variant::PackPlus { bucket_size },
        }
    }
}

/// Storage backend selector for the table store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Fs,
    Memory,
    S3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_tables() {
        assert_eq!(Variant::Base.tables(), &[EDB]);
        assert_eq!(Variant::BasePlus.tables(), &[EDB, EDB2]);
        assert_eq!(Variant::Base.insert_table(), EDB);
        assert_eq!(
            Variant::PackPlus { bucket_size: 4 }.insert_table(),
            EDB2
        );
    }

    #[test]
    fn test_bucket_size_never_zero() {
        assert_eq!(Variant::BasePlus.bucket_size(), 1);
        assert_eq!(Variant::PackPlus { bucket_size: 0 }.bucket_size(), 1);
        assert_eq!(Variant::PackPlus { bucket_size: 100 }.bucket_size(), 100);
    }
}
