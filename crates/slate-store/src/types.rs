//! Core post types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled or published post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Stable unique identifier.
    pub id: Uuid,
    /// Owning user; the subject for notifications and cached views.
    pub user_id: Uuid,
    /// Optional title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Post body.
    pub content: String,
    /// Target channel.
    pub channel: Channel,
    /// Current status of the post.
    pub status: PostStatus,
    /// When this post should be (or was) due for publishing.
    pub scheduled_at: DateTime<Utc>,
    /// When this post was published successfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Number of failed publish attempts. Only ever increases.
    #[serde(default)]
    pub retry_count: u32,
    /// Error message from the most recent failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the next retry is scheduled. Mirrors the queue score while set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When this post was created.
    pub created_at: DateTime<Utc>,
    /// When this post was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Current status of a post.
///
/// Transitions are monotonic: `Scheduled -> Published` or
/// `Scheduled -> Failed`, both terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    /// Waiting in the queue for its due time.
    #[default]
    Scheduled,
    /// Published successfully.
    Published,
    /// Exhausted its retries.
    Failed,
}

/// Target social channel for a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Twitter,
    LinkedIn,
    Facebook,
}

impl Post {
    /// Create a new post scheduled for a future publish time.
    pub fn scheduled(
        user_id: Uuid,
        content: String,
        channel: Channel,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: None,
            content,
            channel,
            status: PostStatus::Scheduled,
            scheduled_at,
            published_at: None,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this post is still eligible for queue activity.
    pub fn is_scheduled(&self) -> bool {
        self.status == PostStatus::Scheduled
    }

    /// Whether this post has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, PostStatus::Published | PostStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_post() -> Post {
        Post::scheduled(
            Uuid::new_v4(),
            "Launch announcement".to_string(),
            Channel::Twitter,
            Utc::now() + chrono::Duration::hours(1),
        )
    }

    #[test]
    fn new_post_is_scheduled() {
        let post = sample_post();
        assert_eq!(post.status, PostStatus::Scheduled);
        assert_eq!(post.retry_count, 0);
        assert!(post.last_error.is_none());
        assert!(post.next_retry_at.is_none());
        assert!(post.is_scheduled());
        assert!(!post.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PostStatus::Scheduled).unwrap(),
            "\"scheduled\""
        );
        assert_eq!(
            serde_json::to_string(&PostStatus::Published).unwrap(),
            "\"published\""
        );
        assert_eq!(
            serde_json::to_string(&PostStatus::Failed).unwrap(),
            "\"failed\""
        );
    }

    #[test]
    fn post_round_trips_through_json() {
        let post = sample_post();
        let json = serde_json::to_string(&post).unwrap();
        let back: Post = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, post.id);
        assert_eq!(back.status, post.status);
        assert_eq!(back.content, post.content);
    }

    #[test]
    fn optional_fields_omitted_when_unset() {
        let post = sample_post();
        let json = serde_json::to_string(&post).unwrap();
        assert!(!json.contains("last_error"));
        assert!(!json.contains("next_retry_at"));
        assert!(!json.contains("published_at"));
    }
}
