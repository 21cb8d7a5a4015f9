//! SyncOrchestrator: user-triggered full push and full pull.
//!
//! Tracks a four-state status for display. `Success` and `Error` fall back
//! to `Idle` on their own after a delay; any newer status change cancels the
//! pending fallback. Only one push or pull runs at a time. Live updates run
//! independently of the status and may land in the middle of a push or pull.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::{EventBus, SyncEvent, SyncStatus, UpdateSource};
use crate::remote::{PullReport, RemoteSyncClient, SyncReport};
use crate::store::LocalStore;
use crate::{Error, Result};

/// Local metadata key holding the last successful sync time
pub const LAST_SYNC_KEY: &str = "last_sync";

/// Status fallback delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    pub success_reset: Duration,
    pub error_reset: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            success_reset: Duration::from_secs(3),
            error_reset: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct StatusState {
    status: SyncStatus,
    message: Option<String>,
    /// Bumped on every change; a pending fallback only fires if unchanged
    generation: u64,
}

/// Push/pull sequencing over a local store and a remote client
pub struct SyncOrchestrator {
    client: Arc<RemoteSyncClient>,
    local: LocalStore,
    events: EventBus,
    timing: SyncTiming,
    state: Arc<Mutex<StatusState>>,
    live_task: Mutex<Option<JoinHandle<()>>>,
    /// Collections subscribed by `start_live_updates`
    live_collections: Mutex<Vec<String>>,
}

impl SyncOrchestrator {
    pub fn new(
        client: Arc<RemoteSyncClient>,
        local: LocalStore,
        events: EventBus,
        timing: SyncTiming,
    ) -> Self {
        Self {
            client,
            local,
            events,
            timing,
            state: Arc::new(Mutex::new(StatusState {
                status: SyncStatus::Idle,
                message: None,
                generation: 0,
            })),
            live_task: Mutex::new(None),
            live_collections: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.state.lock().status
    }

    /// Free-text message accompanying the current status
    pub fn message(&self) -> Option<String> {
        self.state.lock().message.clone()
    }

    pub fn client(&self) -> &Arc<RemoteSyncClient> {
        &self.client
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Time of the last successful push or pull, if any
    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        let raw = self.local.get_value(LAST_SYNC_KEY).await?;
        let parsed = crate::time::from_stored(&raw);
        if parsed.is_none() {
            warn!("Ignoring unparseable last sync time '{}'", raw);
        }
        parsed
    }

    /// Upload every local collection, replacing the remote copies
    ///
    /// Per-collection failures are reported, not fatal; the push only ends
    /// in `Error` when no collection could be written.
    pub async fn push(&self) -> Result<SyncReport> {
        let run = self.begin("Uploading local data")?;

        let report = self.client.sync_all_local_data(&self.local).await;

        for (collection, records) in &report.pushed {
            self.events.emit_lossy(SyncEvent::CollectionPushed {
                collection: collection.clone(),
                records: *records,
                timestamp: crate::time::now(),
            });
        }
        for (collection, err) in &report.failed {
            self.events.emit_lossy(SyncEvent::CollectionPushFailed {
                collection: collection.clone(),
                error: err.clone(),
                timestamp: crate::time::now(),
            });
        }

        if report.is_total_failure() {
            let message = format!("Upload failed for all {} collections", report.failed.len());
            error!("{}", message);
            run.finish(SyncStatus::Error, message);
            return Ok(report);
        }

        self.record_sync_time().await;
        let message = if report.is_complete() {
            format!("Uploaded {} collections", report.pushed.len())
        } else {
            format!(
                "Uploaded {} collections, {} failed",
                report.pushed.len(),
                report.failed.len()
            )
        };
        info!("{}", message);
        run.finish(SyncStatus::Success, message);
        Ok(report)
    }

    /// Download every collection and replace the local copies
    ///
    /// Only collections actually read from the remote are written locally;
    /// missing or unreadable ones keep their local data. Ends with a
    /// [`SyncEvent::ReloadRequested`] so views re-read the store.
    pub async fn pull(&self) -> Result<PullReport> {
        let run = self.begin("Downloading remote data")?;

        let report = self.client.pull_all().await;

        if report.is_total_failure() {
            let message = format!("Download failed for all {} collections", report.failed.len());
            error!("{}", message);
            run.finish(SyncStatus::Error, message);
            return Ok(report);
        }

        for (collection, data) in &report.fetched {
            self.apply(collection, data, UpdateSource::Pull).await;
        }

        self.record_sync_time().await;
        self.events.emit_lossy(SyncEvent::ReloadRequested {
            timestamp: crate::time::now(),
        });

        let message = format!("Downloaded {} collections", report.fetched.len());
        info!("{}", message);
        run.finish(SyncStatus::Success, message);
        Ok(report)
    }

    /// Subscribe to every collection and write foreign changes locally
    ///
    /// Returns the number of collections subscribed. Calling again restarts
    /// the subscriptions.
    pub async fn start_live_updates(&self) -> Result<usize> {
        self.stop_live_updates();

        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Vec<Value>)>();
        let mut subscribed = Vec::new();

        for name in self.client.collections().iter() {
            let tx = tx.clone();
            let collection = name.to_string();
            let result = self
                .client
                .subscribe_to_collection(name, move |data| {
                    let _ = tx.send((collection.clone(), data));
                })
                .await;

            match result {
                Ok(()) => subscribed.push(name.to_string()),
                Err(e) => warn!("Live updates unavailable for {}: {}", name, e),
            }
        }
        drop(tx);

        let local = self.local.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some((collection, data)) = rx.recv().await {
                local.set(&collection, &data).await;
                info!("Live update: {} ({} records)", collection, data.len());
                events.emit_lossy(SyncEvent::CollectionUpdated {
                    collection,
                    records: data.len(),
                    source: UpdateSource::Live,
                    timestamp: crate::time::now(),
                });
            }
        });
        *self.live_task.lock() = Some(task);

        let count = subscribed.len();
        *self.live_collections.lock() = subscribed;

        info!("Live updates started for {} collections", count);
        Ok(count)
    }

    /// Close the subscriptions opened by [`start_live_updates`](Self::start_live_updates)
    ///
    /// Subscriptions made directly on the shared client are left alone.
    pub fn stop_live_updates(&self) {
        let names = std::mem::take(&mut *self.live_collections.lock());
        for name in &names {
            self.client.unsubscribe(name);
        }
        if let Some(task) = self.live_task.lock().take() {
            task.abort();
        }
    }

    pub fn is_live(&self) -> bool {
        self.live_task
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    async fn apply(&self, collection: &str, data: &[Value], source: UpdateSource) {
        self.local.set(collection, data).await;
        self.events.emit_lossy(SyncEvent::CollectionUpdated {
            collection: collection.to_string(),
            records: data.len(),
            source,
            timestamp: crate::time::now(),
        });
    }

    async fn record_sync_time(&self) {
        let now = crate::time::now();
        self.local
            .set_value(LAST_SYNC_KEY, &crate::time::to_stored(&now))
            .await;
    }

    /// Enter `Syncing`, refusing if a push or pull is already running
    ///
    /// The returned guard must be finished; dropping it early (the push or
    /// pull future was cancelled) leaves the status in `Error`.
    fn begin(&self, message: &str) -> Result<SyncRun<'_>> {
        {
            let mut state = self.state.lock();
            if state.status == SyncStatus::Syncing {
                return Err(Error::SyncInProgress);
            }
            state.status = SyncStatus::Syncing;
            state.message = Some(message.to_string());
            state.generation += 1;
        }
        self.emit_status(SyncStatus::Syncing, Some(message.to_string()));
        Ok(SyncRun {
            orchestrator: self,
            finished: false,
        })
    }

    fn set_status(&self, status: SyncStatus, message: Option<String>) {
        let generation = {
            let mut state = self.state.lock();
            state.status = status;
            state.message = message.clone();
            state.generation += 1;
            state.generation
        };
        self.emit_status(status, message);

        let delay = match status {
            SyncStatus::Success => self.timing.success_reset,
            SyncStatus::Error => self.timing.error_reset,
            _ => return,
        };

        // Without a runtime (dropped during shutdown) the status stays put
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = state.lock();
                if state.generation != generation {
                    return;
                }
                state.status = SyncStatus::Idle;
                state.message = None;
                state.generation += 1;
            }
            events.emit_lossy(SyncEvent::StatusChanged {
                status: SyncStatus::Idle,
                message: None,
                timestamp: crate::time::now(),
            });
        });
    }

    fn emit_status(&self, status: SyncStatus, message: Option<String>) {
        self.events.emit_lossy(SyncEvent::StatusChanged {
            status,
            message,
            timestamp: crate::time::now(),
        });
    }
}

/// An in-flight push or pull holding the `Syncing` status
struct SyncRun<'a> {
    orchestrator: &'a SyncOrchestrator,
    finished: bool,
}

impl SyncRun<'_> {
    fn finish(mut self, status: SyncStatus, message: String) {
        self.finished = true;
        self.orchestrator.set_status(status, Some(message));
    }
}

impl Drop for SyncRun<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Sync interrupted before completion");
            self.orchestrator
                .set_status(SyncStatus::Error, Some("Sync interrupted".to_string()));
        }
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.stop_live_updates();
    }
}
