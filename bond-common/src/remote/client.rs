//! RemoteSyncClient: full-collection mirror of local data to a document store.
//!
//! Every collection is written as one envelope at `<collection>/main`,
//! replacing whatever was there. Writes surface errors to the caller; reads
//! log them and fall back to an empty array. Bulk operations are tolerant
//! per collection: one failure never stops the others.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{probe_document, Document, DocumentPath, DocumentStore, SyncEnvelope};
use crate::collections::CollectionSet;
use crate::device::DeviceId;
use crate::store::LocalStore;
use crate::Result;

/// Outcome of a bulk push
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Collections written, with their record counts
    pub pushed: Vec<(String, usize)>,
    /// Collections that failed, with the error text
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// True when at least one collection was attempted and none succeeded
    pub fn is_total_failure(&self) -> bool {
        self.pushed.is_empty() && !self.failed.is_empty()
    }
}

/// Outcome of a bulk fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    /// Collections that exist remotely, with their records
    pub fetched: HashMap<String, Vec<Value>>,
    /// Collections never written remotely
    pub missing: Vec<String>,
    /// Collections that could not be read, with the error text
    pub failed: Vec<(String, String)>,
}

impl PullReport {
    pub fn is_total_failure(&self) -> bool {
        self.fetched.is_empty() && self.missing.is_empty() && !self.failed.is_empty()
    }
}

/// Envelope-level client over a [`DocumentStore`]
pub struct RemoteSyncClient {
    store: Arc<dyn DocumentStore>,
    collections: CollectionSet,
    device_id: Option<DeviceId>,
    subscriptions: Mutex<HashMap<String, super::Subscription>>,
}

impl RemoteSyncClient {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collections: CollectionSet,
        device_id: Option<DeviceId>,
    ) -> Self {
        Self {
            store,
            collections,
            device_id,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn device_id(&self) -> Option<&DeviceId> {
        self.device_id.as_ref()
    }

    pub fn collections(&self) -> &CollectionSet {
        &self.collections
    }

    /// Overwrite `<name>/main` with `data`
    ///
    /// No concurrency check: whatever another device wrote before is replaced.
    pub async fn sync_collection(&self, name: &str, data: &[Value]) -> Result<()> {
        let path = DocumentPath::main(name);
        self.store
            .write(&path, SyncEnvelope::to_write(data, self.device_id.as_ref()))
            .await?;
        debug!("Synced {} ({} records)", name, data.len());
        Ok(())
    }

    /// Records in `<name>/main`; empty if absent, malformed or unreadable
    pub async fn get_collection(&self, name: &str) -> Vec<Value> {
        match self.fetch_collection(name).await {
            Ok(Some(data)) => data,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read collection {}: {}", name, e);
                Vec::new()
            }
        }
    }

    /// Full envelope in `<name>/main`, errors propagated
    pub async fn get_envelope(&self, name: &str) -> Result<Option<SyncEnvelope>> {
        match self.store.read(&DocumentPath::main(name)).await? {
            Some(doc) => Ok(Some(SyncEnvelope::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Records in `<name>/main`, `None` if never written, errors propagated
    pub async fn fetch_collection(&self, name: &str) -> Result<Option<Vec<Value>>> {
        Ok(self.get_envelope(name).await?.map(|env| env.data))
    }

    /// Deliver foreign writes to `<name>/main` to `callback`
    ///
    /// A snapshot is delivered only when its device id differs from this
    /// client's, compared as `Option`s: an anonymous client drops anonymous
    /// writes and receives every identified one. Subscribing a name twice
    /// replaces the earlier subscription.
    pub async fn subscribe_to_collection<F>(&self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        let own_id = self.device_id.clone();
        let collection = name.to_string();

        let on_change = Arc::new(move |doc: Document| {
            match SyncEnvelope::from_document(&doc) {
                Ok(env) if env.device_id != own_id => callback(env.data),
                Ok(_) => debug!("Ignoring own write to {}", collection),
                Err(e) => warn!("Ignoring malformed envelope in {}: {}", collection, e),
            }
        });

        let subscription = self
            .store
            .subscribe(&DocumentPath::main(name), on_change)
            .await?;

        if let Some(previous) = self
            .subscriptions
            .lock()
            .insert(name.to_string(), subscription)
        {
            previous.unsubscribe();
        }

        info!("Subscribed to {}", name);
        Ok(())
    }

    /// Stop delivery for one collection; returns whether it was subscribed
    pub fn unsubscribe(&self, name: &str) -> bool {
        match self.subscriptions.lock().remove(name) {
            Some(subscription) => {
                subscription.unsubscribe();
                true
            }
            None => false,
        }
    }

    /// Tear down every open subscription
    pub fn unsubscribe_all(&self) {
        let drained: Vec<_> = self.subscriptions.lock().drain().collect();
        let count = drained.len();
        for (_, subscription) in drained {
            subscription.unsubscribe();
        }
        if count > 0 {
            info!("Closed {} subscriptions", count);
        }
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions.lock().contains_key(name)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Push every local collection, continuing past failures
    ///
    /// No rollback of collections already written and no retry of failed ones.
    pub async fn sync_all_local_data(&self, local: &LocalStore) -> SyncReport {
        let mut report = SyncReport::default();

        for key in self.collections.local_keys() {
            let name = self.collections.remote_name(&key).to_string();
            let data = local.read_key(&key).await;

            match self.sync_collection(&name, &data).await {
                Ok(()) => report.pushed.push((name, data.len())),
                Err(e) => {
                    error!("Failed to sync {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            "Pushed {} of {} collections",
            report.pushed.len(),
            self.collections.len()
        );
        report
    }

    /// Read every collection; each missing or failed one maps to `[]`
    pub async fn load_all_data(&self) -> HashMap<String, Vec<Value>> {
        let report = self.pull_all().await;
        let mut data = report.fetched;
        for name in self.collections.iter() {
            data.entry(name.to_string()).or_default();
        }
        data
    }

    /// Read every collection, keeping track of what was absent or failed
    pub async fn pull_all(&self) -> PullReport {
        let mut report = PullReport::default();

        for name in self.collections.iter() {
            match self.fetch_collection(name).await {
                Ok(Some(data)) => {
                    report.fetched.insert(name.to_string(), data);
                }
                Ok(None) => report.missing.push(name.to_string()),
                Err(e) => {
                    warn!("Failed to load {}: {}", name, e);
                    report.failed.push((name.to_string(), e.to_string()));
                }
            }
        }

        report
    }

    /// Write the probe document; false on any failure
    pub async fn check_connection(&self) -> bool {
        match self
            .store
            .write(&DocumentPath::probe(), probe_document(self.device_id.as_ref()))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Connection check failed: {}", e);
                false
            }
        }
    }
}

impl Drop for RemoteSyncClient {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryDocumentStore;
    use serde_json::json;

    fn client(store: &Arc<MemoryDocumentStore>, device: Option<&str>) -> RemoteSyncClient {
        RemoteSyncClient::new(
            store.clone(),
            CollectionSet::default(),
            device.map(DeviceId::new),
        )
    }

    #[tokio::test]
    async fn test_envelope_carries_device_id() {
        let store = Arc::new(MemoryDocumentStore::new());
        let client = client(&store, Some("phone"));

        client.sync_collection("voices", &[json!({"id": "1"})]).await.unwrap();

        let env = client.get_envelope("voices").await.unwrap().unwrap();
        assert_eq!(env.device_id, Some(DeviceId::new("phone")));
        assert!(env.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_write_errors_surface_read_errors_do_not() {
        let store = Arc::new(MemoryDocumentStore::new());
        let client = client(&store, None);
        store.set_offline(true);

        assert!(client.sync_collection("voices", &[]).await.is_err());
        assert!(client.get_collection("voices").await.is_empty());
        assert!(client.fetch_collection("voices").await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_remote_document_reads_as_empty() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut doc = crate::remote::WriteDocument::new();
        doc.insert(
            "data".to_string(),
            crate::remote::FieldValue::Value(json!("not an array")),
        );
        store.write(&DocumentPath::main("scores"), doc).await.unwrap();

        let client = client(&store, None);
        assert!(client.get_collection("scores").await.is_empty());
    }

    #[tokio::test]
    async fn test_check_connection() {
        let store = Arc::new(MemoryDocumentStore::new());
        let client = client(&store, Some("a"));

        assert!(client.check_connection().await);
        let probe = store.read(&DocumentPath::probe()).await.unwrap().unwrap();
        assert_eq!(probe.fields["deviceId"], "a");
        assert!(probe.fields["timestamp"].is_string());

        store.set_offline(true);
        assert!(!client.check_connection().await);
    }

    #[test]
    fn test_report_classification() {
        let mut report = SyncReport::default();
        assert!(report.is_complete());
        assert!(!report.is_total_failure());

        report.failed.push(("voices".to_string(), "down".to_string()));
        assert!(report.is_total_failure());

        report.pushed.push(("scores".to_string(), 0));
        assert!(!report.is_total_failure());
        assert!(!report.is_complete());
    }
}
