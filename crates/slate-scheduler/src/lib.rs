//! Scheduling queue and publishing worker for Slate.
//!
//! This crate provides the engine's write path:
//! - A time-ordered queue of post ids with atomic claim semantics
//!   (Redis sorted set in production, an in-memory queue for tests)
//! - A bounded exponential-backoff retry policy
//! - The polling worker that claims due posts, runs the pluggable publish
//!   operation, and drives each post to `published` or `failed`

mod error;
mod queue;
mod retry;
mod worker;

pub use error::SchedulerError;
pub use queue::{DEFAULT_QUEUE_KEY, MemoryQueue, RedisQueue, TimeQueue};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy};
pub use worker::{PublishFn, Worker, WorkerConfig};
