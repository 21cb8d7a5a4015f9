//! # BondApp Common Library
//!
//! Local-first data synchronization for BondApp:
//! - Local persistence of named record collections
//! - Remote document store contract and implementations
//! - Full-collection push/pull with live updates
//! - Event types, configuration loading and database setup

pub mod collections;
pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod events;
pub mod remote;
pub mod store;
pub mod sync;
pub mod time;

pub use collections::CollectionSet;
pub use device::DeviceId;
pub use error::{Error, Result};
pub use events::{EventBus, SyncEvent, SyncStatus};
pub use remote::{DocumentStore, RemoteSyncClient};
pub use store::LocalStore;
pub use sync::SyncOrchestrator;
