//! File-level workflow: add, search, show, remove, rotate and reset, against
//! a real client directory and an in-memory server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use opendal::Operator;
use parsec_core::config::ParsecConfig;
use parsec_core::types::{EDB, EDB2};
use parsec_core::{ParsecError, Variant};
use parsec_crypto::MasterKey;
use parsec_index::vault::FileVault;
use parsec_index::{Indexer, Query, QueryMode, Scheme};
use parsec_storage::OpendalTables;
use tempfile::TempDir;

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn key(byte: u8) -> MasterKey {
    MasterKey::from_bytes([byte; 32])
}

struct Fixture {
    indexer: Indexer<OpendalTables>,
    client: TempDir,
    staging: TempDir,
}

impl Fixture {
    fn new(variant: Variant, adjacency: bool) -> Self {
        let client = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let mut cfg = ParsecConfig::default();
        cfg.watch.client_root = client.path().to_path_buf();
        cfg.watch.staging_dir = staging.path().to_path_buf();

        let op = memory_operator();
        let scheme = Scheme::new(
            Arc::new(OpendalTables::new(op.clone())),
            key(1),
            variant,
            adjacency,
        );
        let indexer = Indexer::new(Arc::new(scheme), FileVault::new(op), &cfg);
        Self {
            indexer,
            client,
            staging,
        }
    }

    fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.client.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn search(&self, text: &str, mode: QueryMode) -> Vec<String> {
        let query = Query::parse(text, mode).unwrap();
        self.indexer.search(&query).await.unwrap().into_iter().collect()
    }
}

// ── Add / search / show ─────────────────────────────────────────────────────

#[tokio::test]
async fn added_file_is_searchable_and_viewable() {
    let fx = Fixture::new(Variant::PackPlus { bucket_size: 4 }, false);
    let path = fx.write("log/keeper.txt", b"The lighthouse keeper saw the storm.");

    let report = fx.indexer.add_file(&path).await.unwrap();
    assert_eq!(report.file, "log/keeper.txt");
    assert_eq!(report.words, 5);

    assert_eq!(fx.search("Lighthouse", QueryMode::Intersection).await, vec!["log/keeper.txt"]);
    assert_eq!(fx.search("storm+keeper", QueryMode::Intersection).await, vec!["log/keeper.txt"]);
    assert!(fx.search("harbour", QueryMode::Intersection).await.is_empty());

    let copy = fx.indexer.show("log/keeper.txt").await.unwrap();
    assert_eq!(copy.as_deref(), Some(&b"The lighthouse keeper saw the storm."[..]));
    assert_eq!(fx.indexer.files().await.unwrap(), vec!["log/keeper.txt"]);
}

#[tokio::test]
async fn and_or_and_phrase_queries() {
    let fx = Fixture::new(Variant::BasePlus, true);
    for (name, text) in [
        ("a.txt", "storm over the harbour"),
        ("b.txt", "calm harbour at dawn"),
        ("c.txt", "harbour storm warning"),
    ] {
        let path = fx.write(name, text.as_bytes());
        fx.indexer.add_file(&path).await.unwrap();
    }

    assert_eq!(fx.search("storm+harbour", QueryMode::Intersection).await, vec!["a.txt", "c.txt"]);
    assert_eq!(fx.search("storm+dawn", QueryMode::Union).await, vec!["a.txt", "b.txt", "c.txt"]);
    assert_eq!(fx.search("harbour+storm", QueryMode::Phrase).await, vec!["c.txt"]);
}

#[tokio::test]
async fn file_outside_client_root_uses_its_name() {
    let fx = Fixture::new(Variant::BasePlus, false);
    assert_eq!(fx.indexer.file_id(&fx.client.path().join("x/y.txt")), "x/y.txt");
    assert_eq!(fx.indexer.file_id(Path::new("/elsewhere/z.txt")), "z.txt");
}

#[tokio::test]
async fn non_text_file_is_rejected() {
    let fx = Fixture::new(Variant::BasePlus, false);
    let path = fx.write("blob.bin", &[0xff, 0xfe, 0x00, 0x80]);

    let err = fx.indexer.add_file(&path).await.unwrap_err();
    assert!(matches!(err, ParsecError::Io(ref e) if e.kind() == std::io::ErrorKind::InvalidData));
    assert!(fx.indexer.files().await.unwrap().is_empty());
}

// ── Remove ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn remove_uses_server_copy_after_client_delete() {
    let fx = Fixture::new(Variant::PackPlus { bucket_size: 2 }, false);
    let keep = fx.write("keep.txt", b"storm at sea");
    let gone = fx.write("gone.txt", b"storm in harbour");
    fx.indexer.add_file(&keep).await.unwrap();
    fx.indexer.add_file(&gone).await.unwrap();

    std::fs::remove_file(&gone).unwrap();
    let report = fx.indexer.remove_file(&gone).await.unwrap();
    assert!(report.found);
    assert_eq!(report.words, 3);

    assert_eq!(fx.search("storm", QueryMode::Intersection).await, vec!["keep.txt"]);
    assert!(fx.search("harbour", QueryMode::Intersection).await.is_empty());
    assert_eq!(fx.indexer.show("gone.txt").await.unwrap(), None);

    // the staging directory holds nothing afterwards
    let staged = std::fs::read_dir(fx.staging.path()).unwrap().count();
    assert_eq!(staged, 0);

    fx.indexer.merge(None, None).await.unwrap();
    assert_eq!(fx.search("storm", QueryMode::Intersection).await, vec!["keep.txt"]);
}

#[tokio::test]
async fn removing_unknown_file_reports_not_found() {
    let fx = Fixture::new(Variant::BasePlus, false);
    let report = fx.indexer.remove_file(&fx.client.path().join("never.txt")).await.unwrap();
    assert!(!report.found);
    assert_eq!(report.words, 0);
    assert!(fx.indexer.scheme().counts(EDB2).await.unwrap().is_empty());
}

// ── Edits ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn edit_then_delete_leaves_no_stale_words() {
    let fx = Fixture::new(Variant::PackPlus { bucket_size: 2 }, false);
    let path = fx.write("a.txt", b"storm");
    fx.indexer.add_file(&path).await.unwrap();

    fx.write("a.txt", b"calm");
    let report = fx.indexer.add_file(&path).await.unwrap();
    assert_eq!(report.words, 1);
    assert_eq!(report.retracted, 1);
    assert!(fx.search("storm", QueryMode::Intersection).await.is_empty());
    assert_eq!(fx.search("calm", QueryMode::Intersection).await, vec!["a.txt"]);

    std::fs::remove_file(&path).unwrap();
    fx.indexer.remove_file(&path).await.unwrap();
    fx.indexer.merge(None, None).await.unwrap();

    assert!(fx.search("storm", QueryMode::Intersection).await.is_empty());
    assert!(fx.search("calm", QueryMode::Intersection).await.is_empty());
}

#[tokio::test]
async fn saving_unchanged_file_writes_no_entries() {
    let fx = Fixture::new(Variant::BasePlus, false);
    let path = fx.write("a.txt", b"gull over reef");
    fx.indexer.add_file(&path).await.unwrap();
    let before = fx.indexer.scheme().counts(EDB2).await.unwrap();

    let report = fx.indexer.add_file(&path).await.unwrap();
    assert_eq!((report.words, report.retracted), (0, 0));
    assert_eq!(fx.indexer.scheme().counts(EDB2).await.unwrap(), before);
}

#[tokio::test]
async fn edits_keep_stable_entries_bounded() {
    let fx = Fixture::new(Variant::PackPlus { bucket_size: 2 }, false);
    let mut paths = Vec::new();
    for name in ["a.txt", "b.txt", "c.txt"] {
        let path = fx.write(name, b"beacon");
        fx.indexer.add_file(&path).await.unwrap();
        paths.push(path);
    }
    fx.indexer.merge(None, None).await.unwrap();

    for round in 0..3 {
        fx.write("a.txt", format!("beacon revision{round}").as_bytes());
        fx.indexer.add_file(&paths[0]).await.unwrap();
        fx.indexer.merge(None, None).await.unwrap();
    }

    let stable = fx.indexer.scheme().counts(EDB).await.unwrap();
    assert_eq!(stable.get("beacon"), Some(&2));
    assert_eq!(
        fx.search("beacon", QueryMode::Intersection).await,
        vec!["a.txt", "b.txt", "c.txt"]
    );
    assert_eq!(fx.search("revision2", QueryMode::Intersection).await, vec!["a.txt"]);
    assert!(fx.search("revision0", QueryMode::Intersection).await.is_empty());
}

#[tokio::test]
async fn edit_replaces_recorded_followers() {
    let fx = Fixture::new(Variant::BasePlus, true);
    let path = fx.write("a.txt", b"storm warning");
    fx.indexer.add_file(&path).await.unwrap();

    fx.write("a.txt", b"storm surge warning");
    fx.indexer.add_file(&path).await.unwrap();

    assert!(fx.search("storm+warning", QueryMode::Phrase).await.is_empty());
    assert_eq!(fx.search("storm+surge", QueryMode::Phrase).await, vec!["a.txt"]);
}

// ── Merge with rotation ─────────────────────────────────────────────────────

#[tokio::test]
async fn rotation_rekeys_file_copies() {
    let fx = Fixture::new(Variant::PackPlus { bucket_size: 3 }, false);
    for (name, text) in [("a.txt", "reef and gull"), ("b.txt", "gull over reef")] {
        let path = fx.write(name, text.as_bytes());
        fx.indexer.add_file(&path).await.unwrap();
    }

    let report = fx.indexer.merge(Some(key(2)), None).await.unwrap();
    assert!(report.rotated);

    assert_eq!(fx.search("gull+reef", QueryMode::Intersection).await, vec!["a.txt", "b.txt"]);
    assert_eq!(
        fx.indexer.show("b.txt").await.unwrap().as_deref(),
        Some(&b"gull over reef"[..])
    );
    assert_eq!(fx.indexer.files().await.unwrap(), vec!["a.txt", "b.txt"]);
    assert_eq!(fx.indexer.vault().fetch(&key(1), "a.txt").await.unwrap(), None);
}

// ── Reset ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reset_clears_server_but_not_client() {
    let fx = Fixture::new(Variant::BasePlus, false);
    let path = fx.write("a.txt", b"lighthouse");
    fx.indexer.add_file(&path).await.unwrap();
    fx.indexer.merge(None, None).await.unwrap();

    fx.indexer.reset().await.unwrap();

    assert!(fx.search("lighthouse", QueryMode::Intersection).await.is_empty());
    assert!(fx.indexer.files().await.unwrap().is_empty());
    assert!(path.exists());

    // the index is usable again straight away
    fx.indexer.add_file(&path).await.unwrap();
    assert_eq!(fx.search("lighthouse", QueryMode::Intersection).await, vec!["a.txt"]);
}
