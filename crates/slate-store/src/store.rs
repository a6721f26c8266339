//! The record store contract and an in-memory implementation.
//!
//! The durable store is owned by the embedding application; the engine only
//! depends on this narrow trait. Every method maps to a single durable
//! statement; no multi-post transactions are required.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Post, PostStatus, StoreError};

/// Durable post storage as seen by the worker and the stream glue.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Load a post with its retry bookkeeping. `None` if the id is unknown.
    async fn get_for_retry(&self, id: Uuid) -> Result<Option<Post>, StoreError>;

    /// Mark a post published. A no-op returning `None` unless the post is
    /// currently `Scheduled`.
    async fn mark_published(&self, id: Uuid) -> Result<Option<Post>, StoreError>;

    /// Terminally mark a post failed, recording the last error.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Record a failed attempt: bump the retry count and set the next retry
    /// time. A no-op unless the post is currently `Scheduled`.
    async fn schedule_retry(
        &self,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Scheduled posts for a user, ascending by due time.
    async fn upcoming_posts(&self, user_id: Uuid) -> Result<Vec<Post>, StoreError>;

    /// Published posts for a user, most recent first.
    async fn published_posts(&self, user_id: Uuid) -> Result<Vec<Post>, StoreError>;
}

/// In-memory `PostStore`.
///
/// Used by tests and by single-process embeddings that have not wired a
/// durable backend yet. Honors the same conditional-update semantics as a
/// SQL store (`mark_published`/`schedule_retry` only touch `Scheduled` rows).
#[derive(Clone, Default)]
pub struct MemoryStore {
    posts: Arc<RwLock<HashMap<Uuid, Post>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a post. Test and seeding helper.
    pub async fn insert(&self, post: Post) {
        self.posts.write().await.insert(post.id, post);
    }

    /// Fetch a post by id regardless of status.
    pub async fn get(&self, id: Uuid) -> Option<Post> {
        self.posts.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn get_for_retry(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        Ok(self.posts.read().await.get(&id).cloned())
    }

    async fn mark_published(&self, id: Uuid) -> Result<Option<Post>, StoreError> {
        let mut posts = self.posts.write().await;
        match posts.get_mut(&id) {
            Some(post) if post.status == PostStatus::Scheduled => {
                let now = Utc::now();
                post.status = PostStatus::Published;
                post.published_at = Some(now);
                post.updated_at = now;
                Ok(Some(post.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut posts = self.posts.write().await;
        if let Some(post) = posts.get_mut(&id) {
            post.status = PostStatus::Failed;
            post.last_error = Some(error.to_string());
            post.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut posts = self.posts.write().await;
        if let Some(post) = posts.get_mut(&id) {
            if post.status == PostStatus::Scheduled {
                post.retry_count += 1;
                post.last_error = Some(error.to_string());
                post.next_retry_at = Some(next_retry_at);
                post.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn upcoming_posts(&self, user_id: Uuid) -> Result<Vec<Post>, StoreError> {
        let posts = self.posts.read().await;
        let mut upcoming: Vec<Post> = posts
            .values()
            .filter(|p| p.user_id == user_id && p.status == PostStatus::Scheduled)
            .cloned()
            .collect();
        upcoming.sort_by_key(|p| p.scheduled_at);
        Ok(upcoming)
    }

    async fn published_posts(&self, user_id: Uuid) -> Result<Vec<Post>, StoreError> {
        let posts = self.posts.read().await;
        let mut published: Vec<Post> = posts
            .values()
            .filter(|p| p.user_id == user_id && p.status == PostStatus::Published)
            .cloned()
            .collect();
        published.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Channel;
    use pretty_assertions::assert_eq;

    fn post_for(user_id: Uuid) -> Post {
        Post::scheduled(
            user_id,
            "hello".to_string(),
            Channel::Twitter,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn mark_published_transitions_scheduled_post() {
        let store = MemoryStore::new();
        let post = post_for(Uuid::new_v4());
        let id = post.id;
        store.insert(post).await;

        let published = store.mark_published(id).await.unwrap().unwrap();
        assert_eq!(published.status, PostStatus::Published);
        assert!(published.published_at.is_some());
    }

    #[tokio::test]
    async fn mark_published_is_noop_for_terminal_post() {
        let store = MemoryStore::new();
        let post = post_for(Uuid::new_v4());
        let id = post.id;
        store.insert(post).await;

        store.mark_failed(id, "boom").await.unwrap();
        assert!(store.mark_published(id).await.unwrap().is_none());
        assert_eq!(store.get(id).await.unwrap().status, PostStatus::Failed);
    }

    #[tokio::test]
    async fn mark_published_unknown_id_returns_none() {
        let store = MemoryStore::new();
        assert!(store.mark_published(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn schedule_retry_bumps_count_and_sets_due_time() {
        let store = MemoryStore::new();
        let post = post_for(Uuid::new_v4());
        let id = post.id;
        store.insert(post).await;

        let next = Utc::now() + chrono::Duration::minutes(2);
        store.schedule_retry(id, next, "api timeout").await.unwrap();

        let updated = store.get(id).await.unwrap();
        assert_eq!(updated.retry_count, 1);
        assert_eq!(updated.next_retry_at, Some(next));
        assert_eq!(updated.last_error.as_deref(), Some("api timeout"));
        assert_eq!(updated.status, PostStatus::Scheduled);
    }

    #[tokio::test]
    async fn schedule_retry_skips_non_scheduled_post() {
        let store = MemoryStore::new();
        let post = post_for(Uuid::new_v4());
        let id = post.id;
        store.insert(post).await;
        store.mark_failed(id, "boom").await.unwrap();

        store
            .schedule_retry(id, Utc::now(), "later failure")
            .await
            .unwrap();
        assert_eq!(store.get(id).await.unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn views_are_scoped_to_user_and_status() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mine = post_for(user);
        let mine_id = mine.id;
        store.insert(mine).await;
        store.insert(post_for(user)).await;
        store.insert(post_for(other)).await;

        store.mark_published(mine_id).await.unwrap();

        let upcoming = store.upcoming_posts(user).await.unwrap();
        let published = store.published_posts(user).await.unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, mine_id);
    }

    #[tokio::test]
    async fn upcoming_posts_sorted_by_due_time() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let mut late = post_for(user);
        late.scheduled_at = Utc::now() + chrono::Duration::hours(2);
        let mut early = post_for(user);
        early.scheduled_at = Utc::now() + chrono::Duration::hours(1);

        let early_id = early.id;
        store.insert(late).await;
        store.insert(early).await;

        let upcoming = store.upcoming_posts(user).await.unwrap();
        assert_eq!(upcoming[0].id, early_id);
    }
}
