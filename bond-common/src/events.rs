//! Event types for the sync event system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Orchestrator status shown next to the sync controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Where a local collection update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// Manual full pull
    Pull,
    /// Live subscription from another device
    Live,
}

/// Sync events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// Orchestrator status changed
    StatusChanged {
        status: SyncStatus,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// One collection was written remotely during a push
    CollectionPushed {
        collection: String,
        records: usize,
        timestamp: DateTime<Utc>,
    },

    /// One collection failed to push; the push carried on with the rest
    CollectionPushFailed {
        collection: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Local data for a collection was replaced with remote data
    CollectionUpdated {
        collection: String,
        records: usize,
        source: UpdateSource,
        timestamp: DateTime<Utc>,
    },

    /// Local data changed underneath the application; views must re-read it
    ReloadRequested { timestamp: DateTime<Utc> },
}

/// Broadcast bus for [`SyncEvent`]s
///
/// Cheap to clone; every clone publishes to the same subscribers. Slow
/// subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
