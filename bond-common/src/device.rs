//! Device identity
//!
//! Every envelope written remotely carries the writer's device id so that a
//! subscribed client can skip its own writes. A device may also run without
//! an id; see [`resolve_device_id`].

use crate::store::LocalStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Local metadata key holding the persisted device id
pub const DEVICE_ID_KEY: &str = "device_id";

/// Opaque writer identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh identity (UUIDv4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve this device's identity
///
/// Priority: explicitly configured id, then the id persisted in the local
/// store, then (when `generate` is set) a newly minted id that is persisted
/// for next time. With `generate` unset and nothing configured or persisted
/// the device runs anonymously (`None`).
pub async fn resolve_device_id(
    store: &LocalStore,
    configured: Option<&str>,
    generate: bool,
) -> Option<DeviceId> {
    if let Some(id) = configured.filter(|s| !s.trim().is_empty()) {
        return Some(DeviceId::new(id.trim()));
    }

    if let Some(id) = store.get_value(DEVICE_ID_KEY).await {
        if !id.trim().is_empty() {
            return Some(DeviceId::new(id));
        }
    }

    if !generate {
        info!("No device id configured; running anonymously");
        return None;
    }

    let id = DeviceId::generate();
    store.set_value(DEVICE_ID_KEY, id.as_str()).await;
    info!("Generated device id {}", id);
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::CollectionSet;
    use crate::db::init_memory_database;

    async fn store() -> LocalStore {
        LocalStore::new(init_memory_database().await.unwrap(), CollectionSet::default())
    }

    #[test]
    fn test_generated_ids_are_distinct_uuids() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = DeviceId::new("laptop");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"laptop\"");
        let none: Option<DeviceId> = None;
        assert_eq!(serde_json::to_string(&none).unwrap(), "null");
    }

    #[tokio::test]
    async fn test_configured_id_wins() {
        let store = store().await;
        store.set_value(DEVICE_ID_KEY, "persisted").await;

        let id = resolve_device_id(&store, Some("configured"), true).await;
        assert_eq!(id, Some(DeviceId::new("configured")));
    }

    #[tokio::test]
    async fn test_generated_id_is_persisted_and_reused() {
        let store = store().await;

        let first = resolve_device_id(&store, None, true).await.unwrap();
        let second = resolve_device_id(&store, None, true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get_value(DEVICE_ID_KEY).await.as_deref(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn test_anonymous_when_generation_disabled() {
        let store = store().await;
        assert!(resolve_device_id(&store, None, false).await.is_none());
        assert!(resolve_device_id(&store, Some("  "), false).await.is_none());
        assert!(store.get_value(DEVICE_ID_KEY).await.is_none());
    }
}
