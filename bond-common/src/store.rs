//! Local persistence of named record arrays
//!
//! Each collection is one JSON array stored under `<prefix><name>` in the
//! `local_store` table. Reads and writes never fail from the caller's point
//! of view: corrupt values read back as an empty array and storage failures
//! are logged and dropped.

use crate::collections::CollectionSet;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::{debug, error, warn};

/// Key/value store of JSON record arrays over SQLite
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    collections: CollectionSet,
}

impl LocalStore {
    pub fn new(pool: SqlitePool, collections: CollectionSet) -> Self {
        Self { pool, collections }
    }

    pub fn collections(&self) -> &CollectionSet {
        &self.collections
    }

    /// Records of a collection, or an empty array if never written or corrupt
    pub async fn get(&self, collection: &str) -> Vec<Value> {
        self.read_key(&self.collections.local_key(collection)).await
    }

    /// Replace a collection's records
    pub async fn set(&self, collection: &str, items: &[Value]) {
        self.write_key(&self.collections.local_key(collection), items)
            .await;
    }

    /// Append one record
    pub async fn add(&self, collection: &str, item: Value) {
        let mut items = self.get(collection).await;
        items.push(item);
        self.set(collection, &items).await;
    }

    /// Shallow-merge `patch` into the record whose `id` matches
    ///
    /// No-op when no record matches or when `patch` is not an object.
    pub async fn update(&self, collection: &str, id: &str, patch: &Value) {
        let Some(fields) = patch.as_object() else {
            warn!("Ignoring non-object update for {}/{}", collection, id);
            return;
        };

        let mut items = self.get(collection).await;
        let mut changed = false;
        for item in items.iter_mut() {
            if record_id(item).as_deref() != Some(id) {
                continue;
            }
            if let Some(obj) = item.as_object_mut() {
                for (k, v) in fields {
                    obj.insert(k.clone(), v.clone());
                }
                changed = true;
            }
        }

        if changed {
            self.set(collection, &items).await;
        } else {
            debug!("update: no record {} in {}", id, collection);
        }
    }

    /// Remove the record(s) whose `id` matches; no-op if none do
    pub async fn delete(&self, collection: &str, id: &str) {
        let items = self.get(collection).await;
        let before = items.len();
        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| record_id(item).as_deref() != Some(id))
            .collect();

        if kept.len() != before {
            self.set(collection, &kept).await;
        } else {
            debug!("delete: no record {} in {}", id, collection);
        }
    }

    /// Remove every known collection
    pub async fn clear(&self) {
        for key in self.collections.local_keys() {
            if let Err(e) = sqlx::query("DELETE FROM local_store WHERE key = ?")
                .bind(&key)
                .execute(&self.pool)
                .await
            {
                error!("Failed to clear {}: {}", key, e);
            }
        }
    }

    /// Snapshot of every known collection as a JSON object
    pub async fn export_data(&self) -> String {
        let mut snapshot = Map::new();
        for name in self.collections.iter() {
            snapshot.insert(name.to_string(), Value::Array(self.get(name).await));
        }

        serde_json::to_string_pretty(&Value::Object(snapshot)).unwrap_or_else(|e| {
            error!("Failed to serialize export: {}", e);
            "{}".to_string()
        })
    }

    /// Overwrite every known collection present in `json`
    ///
    /// Malformed input, unknown keys and non-array values are ignored.
    /// Returns the number of collections written.
    pub async fn import_data(&self, json: &str) -> usize {
        let parsed: Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                error!("Import failed, input is not valid JSON: {}", e);
                return 0;
            }
        };

        let Some(snapshot) = parsed.as_object() else {
            error!("Import failed, input is not a JSON object");
            return 0;
        };

        let mut imported = 0;
        for name in self.collections.iter() {
            match snapshot.get(name) {
                Some(Value::Array(items)) => {
                    self.set(name, items).await;
                    imported += 1;
                }
                Some(_) => warn!("Import: {} is not an array, skipped", name),
                None => {}
            }
        }

        imported
    }

    /// Records stored under a raw local key
    pub async fn read_key(&self, key: &str) -> Vec<Value> {
        let raw = match self.get_value(key).await {
            Some(raw) => raw,
            None => return Vec::new(),
        };

        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!("Discarding corrupt local data under {}: {}", key, e);
                Vec::new()
            }
        }
    }

    /// Replace the records stored under a raw local key
    pub async fn write_key(&self, key: &str, items: &[Value]) {
        match serde_json::to_string(items) {
            Ok(raw) => self.set_value(key, &raw).await,
            Err(e) => error!("Failed to serialize {}: {}", key, e),
        }
    }

    /// Scalar metadata value (last sync time, device id)
    pub async fn get_value(&self, key: &str) -> Option<String> {
        match sqlx::query_scalar::<_, String>("SELECT value FROM local_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set_value(&self, key: &str, value: &str) {
        if let Err(e) = sqlx::query(
            "INSERT OR REPLACE INTO local_store (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        {
            error!("Failed to write {}: {}", key, e);
        }
    }
}

/// String form of a record's `id` field
///
/// Numeric ids compare by their decimal rendering so `{"id": 1}` matches `"1"`.
pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
