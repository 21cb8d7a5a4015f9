//! Integration tests for local persistence
//!
//! Covers round-trip, corrupt/missing data, read-modify-write helpers and
//! bulk export/import, against both in-memory and on-disk databases.

use bond_common::collections::CollectionSet;
use bond_common::db::{init_database, init_memory_database};
use bond_common::LocalStore;
use serde_json::{json, Value};

async fn memory_store() -> LocalStore {
    let pool = init_memory_database().await.unwrap();
    LocalStore::new(pool, CollectionSet::default())
}

#[tokio::test]
async fn test_set_then_get_round_trips() {
    let store = memory_store().await;
    let records = vec![
        json!({"id": "1", "titulo": "Semana Santa", "buses": [{"seats": 55}]}),
        json!({"id": "2", "titulo": "Fiestas", "fecha": null, "pagado": true}),
    ];

    for name in CollectionSet::default().iter() {
        store.set(name, &records).await;
        assert_eq!(store.get(name).await, records, "round trip failed for {}", name);
    }
}

#[tokio::test]
async fn test_get_never_written_is_empty() {
    let store = memory_store().await;
    assert!(store.get("performances").await.is_empty());
    assert!(store.get("not_a_known_collection").await.is_empty());
}

#[tokio::test]
async fn test_get_corrupt_value_is_empty() {
    let store = memory_store().await;
    store.set_value("bondapp_performances", "{not json").await;

    assert!(store.get("performances").await.is_empty());

    // The collection is usable again after a write
    store.add("performances", json!({"id": "1"})).await;
    assert_eq!(store.get("performances").await, vec![json!({"id": "1"})]);
}

#[tokio::test]
async fn test_add_appends() {
    let store = memory_store().await;
    store.add("instruments", json!({"id": "a", "name": "Trumpet"})).await;
    store.add("instruments", json!({"id": "b", "name": "Tuba"})).await;

    let items = store.get("instruments").await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["name"], "Tuba");
}

#[tokio::test]
async fn test_update_merges_fields() {
    let store = memory_store().await;
    store
        .set(
            "contracts",
            &[json!({"id": "c1", "client": "Town Hall", "fee": 900})],
        )
        .await;

    store
        .update("contracts", "c1", &json!({"fee": 1100, "signed": true}))
        .await;

    assert_eq!(
        store.get("contracts").await,
        vec![json!({"id": "c1", "client": "Town Hall", "fee": 1100, "signed": true})]
    );
}

#[tokio::test]
async fn test_update_missing_id_leaves_collection_unchanged() {
    let store = memory_store().await;
    let before = vec![json!({"id": "1", "titulo": "X"}), json!({"id": "2", "titulo": "Y"})];
    store.set("performances", &before).await;

    store
        .update("performances", "404", &json!({"titulo": "changed"}))
        .await;

    assert_eq!(store.get("performances").await, before);
}

#[tokio::test]
async fn test_delete_removes_only_matching_record() {
    let store = memory_store().await;
    store
        .set("voices", &[json!({"id": "1"}), json!({"id": "2"}), json!({"id": "3"})])
        .await;

    store.delete("voices", "2").await;
    assert_eq!(
        store.get("voices").await,
        vec![json!({"id": "1"}), json!({"id": "3"})]
    );

    store.delete("voices", "missing").await;
    assert_eq!(store.get("voices").await.len(), 2);
}

#[tokio::test]
async fn test_clear_removes_known_collections_only() {
    let store = memory_store().await;
    store.set("scores", &[json!({"id": "1"})]).await;
    store.set_value("device_id", "keep-me").await;

    store.clear().await;

    assert!(store.get("scores").await.is_empty());
    assert_eq!(store.get_value("device_id").await.as_deref(), Some("keep-me"));
}

#[tokio::test]
async fn test_export_contains_every_collection() {
    let store = memory_store().await;
    store.set("scores", &[json!({"id": "s1", "title": "Amparito Roca"})]).await;

    let exported: Value = serde_json::from_str(&store.export_data().await).unwrap();
    let obj = exported.as_object().unwrap();

    assert_eq!(obj.len(), 7);
    assert_eq!(obj["scores"][0]["title"], "Amparito Roca");
    assert_eq!(obj["performances"], json!([]));
}

#[tokio::test]
async fn test_import_overwrites_present_keys_only() {
    let store = memory_store().await;
    store.set("voices", &[json!({"id": "old"})]).await;
    store.set("scores", &[json!({"id": "kept"})]).await;

    let imported = store
        .import_data(r#"{"voices": [{"id": "new"}], "unknown": [1], "contracts": "oops"}"#)
        .await;

    assert_eq!(imported, 1);
    assert_eq!(store.get("voices").await, vec![json!({"id": "new"})]);
    assert_eq!(store.get("scores").await, vec![json!({"id": "kept"})]);
    assert!(store.get("contracts").await.is_empty());
}

#[tokio::test]
async fn test_import_malformed_input_is_ignored() {
    let store = memory_store().await;
    store.set("voices", &[json!({"id": "1"})]).await;

    assert_eq!(store.import_data("not json at all").await, 0);
    assert_eq!(store.import_data("[1, 2, 3]").await, 0);
    assert_eq!(store.get("voices").await, vec![json!({"id": "1"})]);
}

#[tokio::test]
async fn test_export_import_between_stores() {
    let source = memory_store().await;
    source.set("inventory", &[json!({"id": "i1", "item": "Music stand"})]).await;
    source.set("categories", &[json!({"id": "k1", "name": "Pasodoble"})]).await;

    let target = memory_store().await;
    assert_eq!(target.import_data(&source.export_data().await).await, 7);

    for name in CollectionSet::default().iter() {
        assert_eq!(target.get(name).await, source.get(name).await);
    }
}

#[tokio::test]
async fn test_data_survives_reopening_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("bondapp.db");

    {
        let pool = init_database(&db_path).await.unwrap();
        let store = LocalStore::new(pool.clone(), CollectionSet::default());
        store.set("performances", &[json!({"id": "1", "titulo": "X"})]).await;
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    let store = LocalStore::new(pool, CollectionSet::default());
    assert_eq!(
        store.get("performances").await,
        vec![json!({"id": "1", "titulo": "X"})]
    );
}

#[tokio::test]
async fn test_custom_prefix() {
    let pool = init_memory_database().await.unwrap();
    let store = LocalStore::new(
        pool,
        CollectionSet::new("band_", vec!["voices".to_string()]),
    );

    store.set("voices", &[json!({"id": "1"})]).await;
    assert!(store.get_value("band_voices").await.is_some());
    assert!(store.get_value("bondapp_voices").await.is_none());
}
