//! Error types for the notifier.

use thiserror::Error;

/// Errors that can occur in notification operations.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Redis connectivity or command error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
