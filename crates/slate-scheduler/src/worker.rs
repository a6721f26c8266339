//! The polling worker that publishes due posts.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use slate_notify::{EventKind, Notifier};
use slate_store::{Post, PostStore, ViewCache};

use crate::{RetryDecision, RetryPolicy, SchedulerError, TimeQueue};

/// Type alias for the pluggable publish operation.
///
/// The only contract: it completes or reports a human-readable failure
/// reason. The worker assumes nothing about latency or side-effect
/// idempotency.
pub type PublishFn =
    Box<dyn Fn(Post) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll the queue for due posts.
    pub poll_interval: Duration,
    /// Maximum posts claimed per poll.
    pub batch_limit: usize,
    /// Maximum publish attempts before a post is marked failed.
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_limit: 100,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// The background publishing worker.
///
/// Repeatedly claims due posts from the queue and drives each one to
/// `published` or through the retry policy. Posts are processed one at a
/// time; each claim is already exclusive, so a mid-batch shutdown only
/// defers unprocessed claims to durable state.
pub struct Worker {
    queue: Arc<dyn TimeQueue>,
    store: Arc<dyn PostStore>,
    cache: Arc<dyn ViewCache>,
    notifier: Notifier,
    policy: RetryPolicy,
    config: WorkerConfig,
    publish: PublishFn,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TimeQueue>,
        store: Arc<dyn PostStore>,
        cache: Arc<dyn ViewCache>,
        notifier: Notifier,
        config: WorkerConfig,
        publish: PublishFn,
    ) -> Self {
        Self {
            queue,
            store,
            cache,
            notifier,
            policy: RetryPolicy::new(config.max_attempts),
            config,
            publish,
        }
    }

    /// Run the polling loop until `shutdown_rx` flips to true.
    ///
    /// Polls once immediately at startup, then on every interval tick.
    /// Shutdown is observed between ticks and between posts in a batch,
    /// never mid-post.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            batch_limit = self.config.batch_limit,
            "worker starting"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender means no shutdown signal will ever
                    // arrive; treat it as one.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                // The first tick fires immediately: the startup pass.
                _ = ticker.tick() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    self.process_due(Some(&shutdown_rx)).await;
                }
            }
        }

        info!("worker shut down gracefully");
    }

    /// One polling pass: claim due posts and process them sequentially.
    /// Returns the number of posts processed.
    pub async fn poll_once(&self) -> usize {
        self.process_due(None).await
    }

    async fn process_due(&self, shutdown_rx: Option<&watch::Receiver<bool>>) -> usize {
        let ids = match self.queue.pop_due(Utc::now(), self.config.batch_limit).await {
            Ok(ids) => ids,
            Err(e) => {
                // Abandoned for this cycle; the next tick retries the poll.
                error!(error = %e, "failed to claim due posts");
                return 0;
            }
        };

        if ids.is_empty() {
            return 0;
        }
        info!(count = ids.len(), "claimed due posts");

        let mut processed = 0;
        for id in ids {
            if shutdown_rx.is_some_and(|rx| *rx.borrow()) {
                info!("shutdown requested, deferring remaining claims to durable state");
                break;
            }
            // One post's failure never aborts the rest of the batch.
            if let Err(e) = self.publish_post(id).await {
                error!(post_id = %id, error = %e, "failed to process claimed post");
            }
            processed += 1;
        }
        processed
    }

    /// Process a single claimed post end to end.
    ///
    /// The id is already out of the queue, so a durable-write failure here
    /// leaves the post in its prior status without automatic retry. That
    /// loss window is accepted; the error is logged by the caller.
    #[tracing::instrument(skip(self), fields(post_id = %id))]
    pub(crate) async fn publish_post(&self, id: Uuid) -> Result<(), SchedulerError> {
        let Some(post) = self.store.get_for_retry(id).await? else {
            warn!("claimed post not found in store");
            return Ok(());
        };

        if !post.is_scheduled() {
            // Deleted or already resolved by another actor before our claim.
            debug!(status = ?post.status, "skipping post no longer scheduled");
            return Ok(());
        }

        match (self.publish)(post.clone()).await {
            Ok(()) => self.handle_publish_success(&post).await,
            Err(reason) => self.handle_publish_error(&post, reason).await,
        }
    }

    async fn handle_publish_success(&self, post: &Post) -> Result<(), SchedulerError> {
        let Some(published) = self.store.mark_published(post.id).await? else {
            warn!(post_id = %post.id, "post vanished or already resolved before publish commit");
            return Ok(());
        };

        self.invalidate_views(post.user_id).await;
        self.notifier.notify(post.user_id, EventKind::Published).await;

        info!(
            post_id = %published.id,
            channel = ?published.channel,
            "published post"
        );
        Ok(())
    }

    async fn handle_publish_error(
        &self,
        post: &Post,
        reason: String,
    ) -> Result<(), SchedulerError> {
        let attempt = post.retry_count + 1;

        match self.policy.on_failure(attempt, Utc::now()) {
            RetryDecision::GiveUp => {
                error!(
                    post_id = %post.id,
                    attempts = attempt,
                    error = %reason,
                    "post failed after exhausting retries"
                );
                self.store.mark_failed(post.id, &reason).await?;
                self.invalidate_views(post.user_id).await;
                self.notifier.notify(post.user_id, EventKind::Updated).await;
                Ok(())
            }
            RetryDecision::Retry { at } => {
                warn!(
                    post_id = %post.id,
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    next_retry = %at,
                    error = %reason,
                    "publish failed, scheduling retry"
                );
                self.store.schedule_retry(post.id, at, &reason).await?;
                self.queue.enqueue(post.id, at).await?;
                Ok(())
            }
        }
    }

    /// Best-effort cache invalidation; failure never aborts the transition.
    async fn invalidate_views(&self, user_id: Uuid) {
        if let Err(e) = self.cache.invalidate_user_posts(user_id).await {
            warn!(user_id = %user_id, error = %e, "failed to invalidate cached views");
        }
    }
}
