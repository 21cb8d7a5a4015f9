//! Common error types for BondApp sync

use thiserror::Error;

/// Common result type for BondApp sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the sync core
#[derive(Error, Debug)]
pub enum Error {
    /// Local database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote document store failure (network, permission, unavailable)
    #[error("Remote error at {path}: {message}")]
    Remote { path: String, message: String },

    /// A push or pull is already running
    #[error("Sync already in progress")]
    SyncInProgress,
}

impl Error {
    /// Build a remote error for the given document path
    pub fn remote(path: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Error::Remote {
            path: path.to_string(),
            message: message.into(),
        }
    }
}
