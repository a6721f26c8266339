//! Short-TTL Redis cache for per-user post views.
//!
//! Read caching for the two hot lists (upcoming and published history).
//! All lookups are best-effort: a connectivity error on read behaves like a
//! miss, and invalidation failures are the caller's to log and ignore.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::trace;
use uuid::Uuid;

use crate::{Post, StoreError};

/// Default TTL for the upcoming-posts view.
pub const UPCOMING_TTL: Duration = Duration::from_secs(30);

/// Default TTL for the published-history view.
pub const HISTORY_TTL: Duration = Duration::from_secs(60);

/// Default cache key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "cache:posts";

/// Cached per-user post views.
#[async_trait]
pub trait ViewCache: Send + Sync {
    /// Cached upcoming posts for a user. `None` on miss.
    async fn get_upcoming(&self, user_id: Uuid) -> Option<Vec<Post>>;

    /// Cache upcoming posts for a user.
    async fn set_upcoming(&self, user_id: Uuid, posts: &[Post]) -> Result<(), StoreError>;

    /// Cached published history for a user. `None` on miss.
    async fn get_history(&self, user_id: Uuid) -> Option<Vec<Post>>;

    /// Cache published history for a user.
    async fn set_history(&self, user_id: Uuid, posts: &[Post]) -> Result<(), StoreError>;

    /// Drop both cached views for a user.
    async fn invalidate_user_posts(&self, user_id: Uuid) -> Result<(), StoreError>;
}

/// Redis-backed `ViewCache`.
#[derive(Clone)]
pub struct RedisViewCache {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisViewCache {
    /// Create a cache with the default key prefix.
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_prefix(conn, DEFAULT_KEY_PREFIX)
    }

    /// Create a cache with an explicit key prefix, so independent instances
    /// (and tests) do not collide.
    pub fn with_prefix(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn upcoming_key(&self, user_id: Uuid) -> String {
        format!("{}:upcoming:{}", self.prefix, user_id)
    }

    fn history_key(&self, user_id: Uuid) -> String {
        format!("{}:history:{}", self.prefix, user_id)
    }

    async fn get_view(&self, key: &str) -> Option<Vec<Post>> {
        let mut conn = self.conn.clone();
        let data: Vec<u8> = conn.get(key).await.ok()?;
        if data.is_empty() {
            return None;
        }
        match serde_json::from_slice(&data) {
            Ok(posts) => Some(posts),
            Err(e) => {
                trace!(key, error = %e, "dropping undecodable cached view");
                None
            }
        }
    }

    async fn set_view(&self, key: &str, posts: &[Post], ttl: Duration) -> Result<(), StoreError> {
        let data = serde_json::to_vec(posts)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, data, ttl.as_secs()).await?;
        Ok(())
    }
}

#[async_trait]
impl ViewCache for RedisViewCache {
    async fn get_upcoming(&self, user_id: Uuid) -> Option<Vec<Post>> {
        self.get_view(&self.upcoming_key(user_id)).await
    }

    async fn set_upcoming(&self, user_id: Uuid, posts: &[Post]) -> Result<(), StoreError> {
        self.set_view(&self.upcoming_key(user_id), posts, UPCOMING_TTL)
            .await
    }

    async fn get_history(&self, user_id: Uuid) -> Option<Vec<Post>> {
        self.get_view(&self.history_key(user_id)).await
    }

    async fn set_history(&self, user_id: Uuid, posts: &[Post]) -> Result<(), StoreError> {
        self.set_view(&self.history_key(user_id), posts, HISTORY_TTL)
            .await
    }

    async fn invalidate_user_posts(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&[self.upcoming_key(user_id), self.history_key(user_id)])
            .await?;
        Ok(())
    }
}

/// `ViewCache` that caches nothing. For deployments without Redis caching
/// and for tests that do not care about the cache path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl ViewCache for NoopCache {
    async fn get_upcoming(&self, _user_id: Uuid) -> Option<Vec<Post>> {
        None
    }

    async fn set_upcoming(&self, _user_id: Uuid, _posts: &[Post]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_history(&self, _user_id: Uuid) -> Option<Vec<Post>> {
        None
    }

    async fn set_history(&self, _user_id: Uuid, _posts: &[Post]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn invalidate_user_posts(&self, _user_id: Uuid) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        let user = Uuid::new_v4();
        assert!(cache.get_upcoming(user).await.is_none());
        assert!(cache.get_history(user).await.is_none());
        cache.set_upcoming(user, &[]).await.unwrap();
        cache.invalidate_user_posts(user).await.unwrap();
    }

    #[test]
    fn keys_are_scoped_by_prefix_and_user() {
        // Key shape only; no connection needed.
        let user = Uuid::nil();
        let upcoming = format!("{}:upcoming:{}", DEFAULT_KEY_PREFIX, user);
        let history = format!("{}:history:{}", DEFAULT_KEY_PREFIX, user);
        assert!(upcoming.starts_with("cache:posts:upcoming:"));
        assert!(history.starts_with("cache:posts:history:"));
        assert_ne!(upcoming, history);
    }
}
