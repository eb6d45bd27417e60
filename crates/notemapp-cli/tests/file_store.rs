//! FileStore tests against a temporary directory.

use note_sync::store::{LocalStore, StoreError, StoreKind};
use notemapp_cli::FileStore;
use serde_json::json;
use tempfile::TempDir;

fn store() -> (TempDir, FileStore) {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path().to_path_buf());
    (dir, store)
}

#[tokio::test]
async fn test_records_land_in_per_kind_directories() {
    let (dir, store) = store();

    store.set(StoreKind::Meta, "abc", json!({"title": "A"})).await.unwrap();
    store
        .set(StoreKind::Content, "abc", json!({"type": "FeatureCollection", "features": []}))
        .await
        .unwrap();

    assert!(dir.path().join("notes-meta/abc.json").exists());
    assert!(dir.path().join("notes/abc.json").exists());
    assert!(!dir.path().join("notes-prefs/abc.json").exists());

    assert_eq!(
        store.get(StoreKind::Meta, "abc").await.unwrap(),
        Some(json!({"title": "A"}))
    );
}

#[tokio::test]
async fn test_missing_records_and_directories() {
    let (_dir, store) = store();

    assert_eq!(store.get(StoreKind::Prefs, "nope").await.unwrap(), None);
    assert!(store.keys(StoreKind::Prefs).await.unwrap().is_empty());
    assert!(store.values(StoreKind::Prefs).await.unwrap().is_empty());
    // Deleting something that never existed is fine
    store.del(StoreKind::Prefs, "nope").await.unwrap();
}

#[tokio::test]
async fn test_keys_and_values_sorted_by_key() {
    let (dir, store) = store();
    store.set(StoreKind::Meta, "b", json!(2)).await.unwrap();
    store.set(StoreKind::Meta, "a", json!(1)).await.unwrap();
    // Stray files are ignored
    std::fs::write(dir.path().join("notes-meta/README.txt"), "hi").unwrap();

    assert_eq!(store.keys(StoreKind::Meta).await.unwrap(), vec!["a", "b"]);
    assert_eq!(store.values(StoreKind::Meta).await.unwrap(), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_update_and_delete() {
    let (_dir, store) = store();
    store.set(StoreKind::Meta, "n1", json!({"title": "A", "pinned": true})).await.unwrap();

    store
        .update(
            StoreKind::Meta,
            "n1",
            Box::new(|current| {
                let mut value = current.unwrap();
                value["title"] = json!("B");
                value
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        store.get(StoreKind::Meta, "n1").await.unwrap(),
        Some(json!({"title": "B", "pinned": true}))
    );

    store.del(StoreKind::Meta, "n1").await.unwrap();
    assert_eq!(store.get(StoreKind::Meta, "n1").await.unwrap(), None);
}

#[tokio::test]
async fn test_path_like_keys_are_rejected() {
    let (_dir, store) = store();
    for key in ["../escape", "a/b", "", "x.json"] {
        assert!(matches!(
            store.set(StoreKind::Meta, key, json!(1)).await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}

#[tokio::test]
async fn test_corrupt_record_is_a_serialization_error() {
    let (dir, store) = store();
    std::fs::create_dir_all(dir.path().join("notes")).unwrap();
    std::fs::write(dir.path().join("notes/bad.json"), "{oops").unwrap();

    assert!(matches!(
        store.get(StoreKind::Content, "bad").await,
        Err(StoreError::Serialization(_))
    ));
}
