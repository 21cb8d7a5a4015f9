//! Remote document store contract and the envelope format written to it
//!
//! The remote side is a document database addressed by
//! `<collection>/<document>` paths. Each synchronized collection occupies a
//! single document, `<collection>/main`, holding the whole record array.
//!
//! # Modules
//!
//! - [`memory`]: in-process store shared between simulated devices.
//! - [`sqlite`]: SQLite file acting as a shared remote.
//! - [`client`]: [`RemoteSyncClient`], the envelope-level API.

pub mod client;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::device::DeviceId;
use crate::{Error, Result};

pub use client::{PullReport, RemoteSyncClient, SyncReport};
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

/// Fixed document id holding a collection's envelope
pub const MAIN_DOCUMENT: &str = "main";

/// Collection holding the connectivity probe
pub const PROBE_COLLECTION: &str = "_connection_test";

/// Document id of the connectivity probe
pub const PROBE_DOCUMENT: &str = "probe";

/// Address of one remote document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    pub collection: String,
    pub document: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            document: document.into(),
        }
    }

    /// `<collection>/main`
    pub fn main(collection: &str) -> Self {
        Self::new(collection, MAIN_DOCUMENT)
    }

    /// The connectivity probe document
    pub fn probe() -> Self {
        Self::new(PROBE_COLLECTION, PROBE_DOCUMENT)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.document)
    }
}

/// A field in a document being written
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    /// Replaced by the store's own clock at write time
    ServerTimestamp,
}

/// Document contents as submitted by a writer
pub type WriteDocument = BTreeMap<String, FieldValue>;

/// Document contents as stored and read back
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub fields: Map<String, Value>,
    /// Server time of the write that produced this version
    pub update_time: DateTime<Utc>,
}

/// Resolve server timestamp sentinels against the store clock
pub fn resolve_fields(doc: WriteDocument, server_time: DateTime<Utc>) -> Map<String, Value> {
    let stamp = Value::String(crate::time::to_stored(&server_time));
    doc.into_iter()
        .map(|(k, v)| match v {
            FieldValue::Value(v) => (k, v),
            FieldValue::ServerTimestamp => (k, stamp.clone()),
        })
        .collect()
}

/// Callback receiving every new snapshot of a subscribed document
pub type ChangeCallback = dyn Fn(Document) + Send + Sync;

/// Live subscription handle
///
/// Delivery stops when the handle is unsubscribed or dropped.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Remote document database
///
/// Writes overwrite the whole document. There is no compare-and-set: the
/// last write to reach the store wins.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Overwrite the document at `path`
    async fn write(&self, path: &DocumentPath, doc: WriteDocument) -> Result<()>;

    /// Current document at `path`, `None` if never written
    async fn read(&self, path: &DocumentPath) -> Result<Option<Document>>;

    /// Deliver the current document (if any) and every later version to
    /// `on_change`
    async fn subscribe(
        &self,
        path: &DocumentPath,
        on_change: Arc<ChangeCallback>,
    ) -> Result<Subscription>;
}

/// Full-collection snapshot stored at `<collection>/main`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    pub data: Vec<Value>,
    #[serde(default, with = "stored_timestamp")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

impl SyncEnvelope {
    /// Document to write for `data`, timestamped by the server
    pub fn to_write(data: &[Value], device_id: Option<&DeviceId>) -> WriteDocument {
        let mut doc = WriteDocument::new();
        doc.insert("data".to_string(), FieldValue::Value(Value::Array(data.to_vec())));
        doc.insert("lastModified".to_string(), FieldValue::ServerTimestamp);
        doc.insert("deviceId".to_string(), FieldValue::Value(device_value(device_id)));
        doc
    }

    /// Parse a stored document; fails when `data` is missing or not an array
    pub fn from_document(doc: &Document) -> Result<Self> {
        serde_json::from_value(Value::Object(doc.fields.clone())).map_err(Error::from)
    }
}

/// Probe document written by connectivity checks
pub fn probe_document(device_id: Option<&DeviceId>) -> WriteDocument {
    let mut doc = WriteDocument::new();
    doc.insert("timestamp".to_string(), FieldValue::ServerTimestamp);
    doc.insert("deviceId".to_string(), FieldValue::Value(device_value(device_id)));
    doc
}

fn device_value(device_id: Option<&DeviceId>) -> Value {
    device_id
        .map(|d| Value::String(d.as_str().to_string()))
        .unwrap_or(Value::Null)
}

mod stored_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&crate::time::to_stored(ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        Ok(raw.as_deref().and_then(crate::time::from_stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths() {
        assert_eq!(DocumentPath::main("scores").to_string(), "scores/main");
        assert_eq!(DocumentPath::probe().to_string(), "_connection_test/probe");
    }

    #[test]
    fn test_envelope_write_and_parse() {
        let device = DeviceId::new("tablet");
        let data = vec![json!({"id": "1"})];
        let now = Utc::now();

        let fields = resolve_fields(SyncEnvelope::to_write(&data, Some(&device)), now);
        assert_eq!(fields["deviceId"], "tablet");
        assert!(fields["lastModified"].is_string());

        let env = SyncEnvelope::from_document(&Document {
            fields,
            update_time: now,
        })
        .unwrap();
        assert_eq!(env.data, data);
        assert_eq!(env.device_id, Some(device));
        assert_eq!(
            env.last_modified.unwrap().timestamp_millis(),
            now.timestamp_millis()
        );
    }

    #[test]
    fn test_anonymous_envelope_has_null_device() {
        let fields = resolve_fields(SyncEnvelope::to_write(&[], None), Utc::now());
        assert_eq!(fields["deviceId"], Value::Null);
    }

    #[test]
    fn test_envelope_without_data_is_rejected() {
        let mut fields = Map::new();
        fields.insert("deviceId".to_string(), json!("x"));
        let doc = Document {
            fields,
            update_time: Utc::now(),
        };
        assert!(SyncEnvelope::from_document(&doc).is_err());
    }

    #[test]
    fn test_probe_document_fields() {
        let doc = probe_document(None);
        assert_eq!(doc.get("timestamp"), Some(&FieldValue::ServerTimestamp));
        assert_eq!(doc.get("deviceId"), Some(&FieldValue::Value(Value::Null)));
    }
}
