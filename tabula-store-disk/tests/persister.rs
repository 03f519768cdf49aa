// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Integration tests for loading and saving a data directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tabula_store_core::Store;
use tabula_store_disk::{Error, IndexEntry, Persister, PersisterConfig};
use tabula_utils_test::{CanonicalTempDir, Op, arb_ops, row};

fn config(data_path: &Path) -> PersisterConfig {
    PersisterConfig::new(data_path)
        .collection("users", ["email", "organisationId"])
        .collection("teams", ["name"])
        .collection("projects", ["organisationId"])
}

fn open(data_path: &Path) -> (Store, Persister) {
    let store = Store::new();
    let persister = Persister::new(&store, config(data_path));
    (store, persister)
}

/// Every non-empty file below `root`, keyed by relative path.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, String> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let contents = std::fs::read_to_string(&path).unwrap();
                if !contents.is_empty() {
                    out.insert(path.strip_prefix(root).unwrap().to_owned(), contents);
                }
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[test_log::test(tokio::test)]
async fn test_round_trip() {
    let dir = CanonicalTempDir::new().unwrap();
    let (store, persister) = open(&dir.data_path());
    store.set_row(
        "users",
        "u1",
        row(json!({"email": "a@x.com", "name": "Alice", "age": 30, "tags": ["a", "b"]})),
    );
    store.set_row("users", "u2", row(json!({"email": "b@x.com", "active": false})));
    store.set_row("teams", "t1", row(json!({"name": "Core", "meta": {"size": 3}})));
    store.set_value("schemaVersion", json!(2));
    persister.save(None).await.unwrap();

    let (reloaded, persister) = open(&dir.data_path());
    persister.load().await.unwrap();

    assert_eq!(reloaded.tables(), store.tables());
    assert_eq!(reloaded.values(), store.values());
    assert!(!reloaded.has_changes());
}

#[tokio::test]
async fn test_on_disk_format() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    let (store, persister) = open(&data);
    store.set_row("users", "u2", row(json!({"email": "b@x.com"})));
    store.set_row("users", "u1", row(json!({"email": "a@x.com", "organisationId": null})));
    persister.save(None).await.unwrap();

    let record = std::fs::read_to_string(data.join("users/u1.json")).unwrap();
    assert_eq!(
        record,
        "{\n  \"email\": \"a@x.com\",\n  \"organisationId\": null\n}"
    );
    assert_eq!(
        std::fs::read_to_string(data.join("users/indices/email.jsonl")).unwrap(),
        "{\"key\":\"a@x.com\",\"rowId\":\"u1\"}\n{\"key\":\"b@x.com\",\"rowId\":\"u2\"}\n"
    );
    assert_eq!(
        std::fs::read_to_string(data.join("users/indices/organisationId.jsonl")).unwrap(),
        ""
    );
    assert_eq!(
        std::fs::read_to_string(data.join("_values.json")).unwrap(),
        "{}"
    );
    assert_eq!(
        persister.read_index_file("users", "email").await.unwrap(),
        vec![
            IndexEntry {
                key: json!("a@x.com"),
                row_id: "u1".into()
            },
            IndexEntry {
                key: json!("b@x.com"),
                row_id: "u2".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_load_missing_directory_creates_it() {
    let dir = CanonicalTempDir::new().unwrap();
    let (store, persister) = open(&dir.data_path());

    persister.load().await.unwrap();

    assert!(dir.data_path().is_dir());
    assert!(store.table_names().is_empty());
}

#[tokio::test]
async fn test_load_ignores_temp_and_foreign_files() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    std::fs::create_dir_all(data.join("users/indices")).unwrap();
    std::fs::write(data.join("users/u1.json"), r#"{"name": "committed"}"#).unwrap();
    std::fs::write(data.join("users/u1.json.tmp"), r#"{"name": "torn"#).unwrap();
    std::fs::write(data.join("users/u2.json.tmp"), r#"{"name": "uncommitted"}"#).unwrap();
    std::fs::write(data.join("users/notes.txt"), "not a record").unwrap();
    std::fs::write(data.join("users/indices/email.jsonl"), "garbage").unwrap();
    std::fs::create_dir(data.join("users/nested.json")).unwrap();
    std::fs::write(data.join("_values.json.tmp"), "{").unwrap();
    // Not a configured collection
    std::fs::create_dir_all(data.join("strangers")).unwrap();
    std::fs::write(data.join("strangers/s1.json"), "{").unwrap();

    let (store, persister) = open(&data);
    persister.load().await.unwrap();

    assert_eq!(store.row_ids("users"), vec!["u1"]);
    assert_eq!(store.row("users", "u1"), Some(row(json!({"name": "committed"}))));
    assert!(store.values().is_empty());
}

#[tokio::test]
async fn test_load_malformed_record_fails() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    std::fs::create_dir_all(data.join("users")).unwrap();
    std::fs::write(data.join("users/bad.json"), "{\"name\": ").unwrap();

    let (store, persister) = open(&data);
    store.set_row("users", "keep", row(json!({"name": "in memory"})));

    let err = persister.load().await.unwrap_err();
    assert!(matches!(&err, Error::Json { path, .. } if path.ends_with("users/bad.json")));
    // Failed load leaves the store alone.
    assert!(store.has_row("users", "keep"));
}

#[tokio::test]
async fn test_load_non_object_record_fails() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    std::fs::create_dir_all(data.join("users")).unwrap();
    std::fs::write(data.join("users/list.json"), "[1, 2, 3]").unwrap();

    let (_store, persister) = open(&data);
    assert!(matches!(
        persister.load().await,
        Err(Error::InvalidRecord { .. })
    ));
}

#[tokio::test]
async fn test_delete_removes_file_on_next_save() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    let (store, persister) = open(&data);
    store.set_row("users", "u1", row(json!({"email": "a@x.com"})));
    store.set_row("users", "u2", row(json!({"email": "b@x.com"})));
    persister.save_changes().await.unwrap();
    assert!(data.join("users/u1.json").exists());

    assert!(store.del_row("users", "u1"));
    assert!(!store.del_row("users", "u1"));
    // Still on disk until the next save.
    assert!(data.join("users/u1.json").exists());

    let stats = persister.save_changes().await.unwrap();
    assert_eq!(stats.rows_deleted, 1);
    assert!(!data.join("users/u1.json").exists());
    assert_eq!(
        persister.read_index_file("users", "email").await.unwrap(),
        vec![IndexEntry {
            key: json!("b@x.com"),
            row_id: "u2".into()
        }]
    );
}

#[tokio::test]
async fn test_full_save_prunes_stale_records() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    std::fs::create_dir_all(data.join("users")).unwrap();
    std::fs::write(data.join("users/ghost.json"), r#"{"name": "Ghost"}"#).unwrap();

    let (store, persister) = open(&data);
    store.set_row("users", "u1", row(json!({"name": "Alice"})));
    let stats = persister.save(None).await.unwrap();

    assert_eq!(stats.rows_written, 1);
    assert_eq!(stats.rows_deleted, 1);
    assert!(!data.join("users/ghost.json").exists());
}

#[tokio::test]
async fn test_unconfigured_collection_is_skipped() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    let (store, persister) = open(&data);
    store.set_row("scratch", "s1", row(json!({"note": "temporary"})));
    store.set_row("users", "u1", row(json!({"email": "a@x.com"})));

    persister.save(None).await.unwrap();
    store.set_row("scratch", "s2", row(json!({"note": "again"})));
    persister.save(Some(store.take_changes())).await.unwrap();

    assert!(!data.join("scratch").exists());
    assert!(data.join("users/u1.json").exists());
}

#[tokio::test]
async fn test_incremental_save_isolation() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    let (store, persister) = open(&data);
    persister.load().await.unwrap();
    // First save is full; nothing exists yet so no directories appear.
    persister.save_changes().await.unwrap();
    assert!(!data.join("teams").exists());

    store.set_row("users", "u1", row(json!({"email": "a@x.com"})));
    let stats = persister.save_changes().await.unwrap();

    assert_eq!(stats.rows_written, 1);
    assert_eq!(stats.index_files_written, 2);
    assert!(!stats.values_written);
    assert!(data.join("users/u1.json").exists());
    assert!(!data.join("teams").exists());
    assert!(!data.join("projects").exists());
}

#[tokio::test]
async fn test_failed_save_restores_changes() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    std::fs::create_dir_all(&data).unwrap();
    // A file where the collection directory should go.
    std::fs::write(data.join("users"), "blocker").unwrap();

    let (store, persister) = open(&data);
    store.set_row("users", "u1", row(json!({"email": "a@x.com"})));

    assert!(persister.save_changes().await.is_err());
    assert!(store.has_changes());

    std::fs::remove_file(data.join("users")).unwrap();
    let stats = persister.save_changes().await.unwrap();
    assert!(stats.full);
    assert!(data.join("users/u1.json").exists());
    assert!(!store.has_changes());
}

#[tokio::test]
async fn test_clean_temp_files() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    std::fs::create_dir_all(data.join("users/indices")).unwrap();
    std::fs::write(data.join("_values.json.tmp"), "{").unwrap();
    std::fs::write(data.join("users/u1.json.tmp"), "{").unwrap();
    std::fs::write(data.join("users/u1.json"), "{}").unwrap();
    std::fs::write(data.join("users/indices/email.jsonl.tmp"), "").unwrap();

    let (_store, persister) = open(&data);
    assert_eq!(persister.clean_temp_files().await.unwrap(), 3);
    assert_eq!(persister.clean_temp_files().await.unwrap(), 0);
    assert!(data.join("users/u1.json").exists());
}

#[tokio::test]
async fn test_rebuild_indices() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    let (store, persister) = open(&data);
    store.set_row("users", "u1", row(json!({"email": "a@x.com"})));
    persister.save(None).await.unwrap();

    std::fs::remove_file(data.join("users/indices/email.jsonl")).unwrap();
    assert_eq!(persister.rebuild_indices().await.unwrap(), 2);
    assert_eq!(
        persister.read_index_file("users", "email").await.unwrap(),
        vec![IndexEntry {
            key: json!("a@x.com"),
            row_id: "u1".into()
        }]
    );
}

#[test_log::test(tokio::test)]
async fn test_auto_save() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    let store = Store::new();
    let persister = Persister::new(
        &store,
        config(&data).auto_save_interval(Duration::from_millis(20)),
    );
    persister.load().await.unwrap();

    persister.start_auto_save().unwrap();
    persister.start_auto_save().unwrap();
    assert!(persister.is_auto_saving());

    store.set_row("users", "u1", row(json!({"email": "a@x.com"})));
    let saved = data.join("users/u1.json");
    for _ in 0..100 {
        if saved.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(saved.exists());

    persister.stop_auto_save().await.unwrap();
    assert!(!persister.is_auto_saving());

    store.set_row("users", "u2", row(json!({"email": "b@x.com"})));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!data.join("users/u2.json").exists());
    assert!(store.has_changes());
}

#[tokio::test]
async fn test_external_change_listener() {
    let dir = CanonicalTempDir::new().unwrap();
    let data = dir.data_path();
    let (_store, persister) = open(&data);
    std::fs::create_dir_all(data.join("users")).unwrap();

    let (tx, rx) = mpsc::channel();
    persister
        .start_listening(move |change| {
            let _ = tx.send(change);
        })
        .unwrap();
    assert!(persister.is_listening());

    std::fs::write(data.join("users/u1.json.tmp"), "{}").unwrap();
    std::fs::write(data.join("users/u1.json"), r#"{"name": "Alice"}"#).unwrap();

    let target = data.join("users/u1.json");
    let mut seen = false;
    while let Ok(change) = rx.recv_timeout(Duration::from_secs(5)) {
        assert!(change.paths.iter().all(|p| !p.to_string_lossy().ends_with(".tmp")));
        if change.paths.contains(&target) {
            seen = true;
            break;
        }
    }
    assert!(seen);

    assert!(persister.stop_listening());
    assert!(!persister.stop_listening());
}

fn apply(store: &Store, op: &Op) {
    match op {
        Op::Set {
            collection,
            row_id,
            row,
        } => store.set_row(collection, row_id, row.clone()),
        Op::Partial {
            collection,
            row_id,
            row,
        } => {
            store.set_partial_row(collection, row_id, row.clone());
        }
        Op::Delete { collection, row_id } => {
            store.del_row(collection, row_id);
        }
        Op::SetValue { key, value } => store.set_value(key, value.clone()),
        Op::Save => {}
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn proptest_incremental_matches_full(ops in arb_ops(30)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let incremental_dir = CanonicalTempDir::new().unwrap();
            let full_dir = CanonicalTempDir::new().unwrap();

            let store = Store::new();
            let incremental = Persister::new(&store, config(&incremental_dir.data_path()));
            incremental.load().await.unwrap();
            for op in &ops {
                apply(&store, op);
                if matches!(op, Op::Save) {
                    incremental.save_changes().await.unwrap();
                }
            }
            incremental.save_changes().await.unwrap();

            let full = Persister::new(&store, config(&full_dir.data_path()));
            full.save(None).await.unwrap();

            prop_assert_eq!(
                snapshot(&incremental_dir.data_path()),
                snapshot(&full_dir.data_path())
            );
            Ok(())
        })?;
    }
}
