//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in queue and worker operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Redis connectivity or command error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Durable store error.
    #[error("store error: {0}")]
    Store(#[from] slate_store::StoreError),
}
