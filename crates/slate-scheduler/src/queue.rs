//! Time-ordered queue of post ids with atomic claim semantics.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::SchedulerError;

/// Default sorted-set key for the scheduling queue.
pub const DEFAULT_QUEUE_KEY: &str = "posts:scheduled";

/// Time-ordered membership of post ids with at-most-one-claimant pops.
#[async_trait]
pub trait TimeQueue: Send + Sync {
    /// Insert or update a post's due time. Last writer wins; a duplicate id
    /// is not an error.
    async fn enqueue(&self, id: Uuid, due_at: DateTime<Utc>) -> Result<(), SchedulerError>;

    /// Remove a post from the queue. Idempotent; removing an absent id is
    /// not an error.
    async fn remove(&self, id: Uuid) -> Result<(), SchedulerError>;

    /// Claim up to `limit` posts whose due time has elapsed, ascending by
    /// due time. Every returned id is removed as part of the claim; an id
    /// lost to a concurrent claimant is silently excluded. No id is ever
    /// returned to two concurrent callers.
    async fn pop_due(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<Uuid>, SchedulerError>;

    /// Number of queued posts. Observability only.
    async fn len(&self) -> Result<usize, SchedulerError>;
}

/// Redis sorted-set `TimeQueue`.
///
/// Members are post ids scored by unix due time. The claim in `pop_due` is
/// a per-member ZREM: the caller whose ZREM removes the member owns it, so
/// competing workers never claim the same post.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisQueue {
    /// Create a queue on the default key.
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_key(conn, DEFAULT_QUEUE_KEY)
    }

    /// Create a queue on an explicit key, so independent instances (and
    /// tests) do not collide.
    pub fn with_key(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }

    /// The sorted-set key this queue lives under.
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl TimeQueue for RedisQueue {
    async fn enqueue(&self, id: Uuid, due_at: DateTime<Utc>) -> Result<(), SchedulerError> {
        let mut conn = self.conn.clone();
        // ZADD overwrites the score of an existing member.
        let _: () = conn
            .zadd(&self.key, id.to_string(), due_at.timestamp())
            .await?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), SchedulerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(&self.key, id.to_string()).await?;
        Ok(())
    }

    async fn pop_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, SchedulerError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrangebyscore_limit(&self.key, "-inf", now.timestamp(), 0, limit as isize)
            .await?;

        let mut claimed = Vec::with_capacity(members.len());
        for member in members {
            let Ok(id) = Uuid::parse_str(&member) else {
                warn!(member, key = %self.key, "skipping non-uuid queue member");
                continue;
            };

            // The claim: whoever's ZREM removes the member owns it. A
            // removal count of zero means another worker won the race.
            let removed: Result<i64, redis::RedisError> = conn.zrem(&self.key, &member).await;
            if !zrem_claimed(removed, &member, &self.key) {
                continue;
            }
            claimed.push(id);
        }

        Ok(claimed)
    }

    async fn len(&self) -> Result<usize, SchedulerError> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(&self.key).await?)
    }
}

/// Whether a ZREM outcome constitutes a claim. A failed ZREM is treated
/// like a lost race: the member is still in the sorted set, so a later
/// pass will see it again, and ids claimed earlier in the batch survive.
fn zrem_claimed(removed: Result<i64, redis::RedisError>, member: &str, key: &str) -> bool {
    match removed {
        Ok(count) => count > 0,
        Err(err) => {
            warn!(member, key, error = %err, "claim failed, leaving member queued");
            false
        }
    }
}

#[derive(Default)]
struct MemoryQueueInner {
    // Due-time ordering with id as the deterministic tiebreaker.
    by_due: BTreeMap<(i64, Uuid), ()>,
    scores: HashMap<Uuid, i64>,
}

/// In-memory `TimeQueue` with the same contract as [`RedisQueue`].
///
/// The whole pop is one critical section, so concurrent callers observe
/// the same at-most-one-claimant guarantee.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<MemoryQueueInner>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeQueue for MemoryQueue {
    async fn enqueue(&self, id: Uuid, due_at: DateTime<Utc>) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        let score = due_at.timestamp();
        if let Some(old) = inner.scores.insert(id, score) {
            inner.by_due.remove(&(old, id));
        }
        inner.by_due.insert((score, id), ());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        if let Some(score) = inner.scores.remove(&id) {
            inner.by_due.remove(&(score, id));
        }
        Ok(())
    }

    async fn pop_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, SchedulerError> {
        let mut inner = self.inner.lock().await;
        let cutoff = now.timestamp();

        let due: Vec<(i64, Uuid)> = inner
            .by_due
            .keys()
            .take_while(|(score, _)| *score <= cutoff)
            .take(limit)
            .copied()
            .collect();

        let mut claimed = Vec::with_capacity(due.len());
        for (score, id) in due {
            inner.by_due.remove(&(score, id));
            inner.scores.remove(&id);
            claimed.push(id);
        }
        Ok(claimed)
    }

    async fn len(&self) -> Result<usize, SchedulerError> {
        Ok(self.inner.lock().await.scores.len())
    }
}
