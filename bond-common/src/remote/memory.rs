//! In-process document store for tests
//!
//! Every version written is kept in the history and change channels are
//! never released, so memory grows with use; not meant for long-running
//! processes.
//!
//! Share one `Arc<MemoryDocumentStore>` between several clients to simulate
//! devices talking to the same remote. Server timestamps are strictly
//! increasing, so the write with the latest `lastModified` is always the one
//! left in the store. Fault injection (`set_offline`, `fail_collection`)
//! lets tests exercise the client's error paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{
    resolve_fields, ChangeCallback, Document, DocumentPath, DocumentStore, Subscription,
    WriteDocument,
};
use crate::{Error, Result};

/// Buffered change notifications per document before slow subscribers lag
const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct MemoryInner {
    docs: HashMap<DocumentPath, Document>,
    history: HashMap<DocumentPath, Vec<Document>>,
    channels: HashMap<DocumentPath, broadcast::Sender<Document>>,
    last_issued: Option<DateTime<Utc>>,
    offline: bool,
    failing: HashSet<String>,
}

impl MemoryInner {
    /// Next server timestamp, strictly after the previous one
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_issued {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_issued = Some(ts);
        ts
    }

    fn check_available(&self, path: &DocumentPath) -> Result<()> {
        if self.offline {
            return Err(Error::remote(path, "store unavailable"));
        }
        if self.failing.contains(&path.collection) {
            return Err(Error::remote(path, "permission denied"));
        }
        Ok(())
    }
}

/// Document store held entirely in memory
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, as if the network were down
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Make every operation on one collection fail
    pub fn fail_collection(&self, collection: &str) {
        self.inner.lock().failing.insert(collection.to_string());
    }

    pub fn restore_collection(&self, collection: &str) {
        self.inner.lock().failing.remove(collection);
    }

    /// Every version ever written at `path`, oldest first
    pub fn history(&self, path: &DocumentPath) -> Vec<Document> {
        self.inner
            .lock()
            .history
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of documents currently stored
    pub fn len(&self) -> usize {
        self.inner.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn write(&self, path: &DocumentPath, doc: WriteDocument) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_available(path)?;

        let update_time = inner.next_timestamp();
        let stored = Document {
            fields: resolve_fields(doc, update_time),
            update_time,
        };

        inner.docs.insert(path.clone(), stored.clone());
        inner
            .history
            .entry(path.clone())
            .or_default()
            .push(stored.clone());

        if let Some(tx) = inner.channels.get(path) {
            // No receivers is fine; subscriptions may all be gone
            let _ = tx.send(stored);
        }

        debug!("memory store: wrote {}", path);
        Ok(())
    }

    async fn read(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let inner = self.inner.lock();
        inner.check_available(path)?;
        Ok(inner.docs.get(path).cloned())
    }

    async fn subscribe(
        &self,
        path: &DocumentPath,
        on_change: Arc<ChangeCallback>,
    ) -> Result<Subscription> {
        // Snapshot and receiver are taken under one lock so no write falls between them
        let (initial, mut rx) = {
            let mut inner = self.inner.lock();
            inner.check_available(path)?;
            let rx = inner
                .channels
                .entry(path.clone())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe();
            (inner.docs.get(path).cloned(), rx)
        };

        let label = path.to_string();
        let task = tokio::spawn(async move {
            if let Some(doc) = initial {
                on_change(doc);
            }
            loop {
                match rx.recv().await {
                    Ok(doc) => on_change(doc),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Subscription to {} skipped {} versions", label, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(task))
    }
}
