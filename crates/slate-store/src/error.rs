//! Error types for the storage layer.

use thiserror::Error;

/// Errors that can occur in store and cache operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis connectivity or command error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backing store rejected the operation.
    #[error("store error: {0}")]
    Backend(String),
}
