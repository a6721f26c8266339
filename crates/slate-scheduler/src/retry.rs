//! Bounded exponential-backoff retry policy.

use chrono::{DateTime, Duration, Utc};

/// Default maximum number of publish attempts before a post is marked
/// failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What to do after a failed publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue for another attempt at the given time.
    Retry { at: DateTime<Utc> },
    /// Attempts exhausted; mark the post failed.
    GiveUp,
}

/// Pure mapping from attempt count to the next retry time.
///
/// Backoff doubles per attempt: 2, 4, 8 minutes. With the default bound of
/// 3 attempts a post waits 2 then 4 minutes and fails on the third attempt.
/// The policy holds no state of its own; `retry_count` and `next_retry_at`
/// are durable, so the schedule survives process restarts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide the outcome of a failure, where `attempt` is the attempt
    /// count after incrementing for this failure (first failure = 1).
    pub fn on_failure(&self, attempt: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                at: now + self.backoff(attempt),
            }
        }
    }

    /// Backoff delay for a given attempt count: `2^attempt` minutes.
    pub fn backoff(&self, attempt: u32) -> Duration {
        // Capped shift to keep the arithmetic sane for absurd counts.
        Duration::minutes(1i64 << attempt.min(30))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
