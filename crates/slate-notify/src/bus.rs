//! The cross-process broadcast bus.
//!
//! The bus only synchronizes notification state across otherwise-isolated
//! processes; the subscriber registry itself never leaves process memory.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::{NotifyError, PostEvent};

/// Default pub/sub channel name for post update events.
pub const DEFAULT_BUS_CHANNEL: &str = "post_updates";

/// A stream of events received from the bus.
pub type EventStream = futures_util::stream::BoxStream<'static, PostEvent>;

/// Publish/subscribe transport connecting Notifier instances across
/// processes.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Broadcast an event to every process subscribed to the bus.
    async fn publish(&self, event: &PostEvent) -> Result<(), NotifyError>;

    /// Open a subscription to events published by any process. Malformed
    /// messages are logged and dropped, never surfaced to the consumer.
    async fn subscribe(&self) -> Result<EventStream, NotifyError>;
}

/// Redis pub/sub `EventBus`.
///
/// Events are JSON-encoded `PostEvent`s on a single named channel. The
/// channel name is injected at construction so independent instances do not
/// collide.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
    channel: String,
}

impl RedisBus {
    /// Connect with the default channel name.
    pub async fn connect(url: &str) -> Result<Self, NotifyError> {
        Self::connect_channel(url, DEFAULT_BUS_CHANNEL).await
    }

    /// Connect with an explicit channel name.
    pub async fn connect_channel(url: &str, channel: impl Into<String>) -> Result<Self, NotifyError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            client,
            conn,
            channel: channel.into(),
        })
    }

    /// The pub/sub channel this bus publishes on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, event: &PostEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(&self.channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, NotifyError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "dropping unreadable bus message");
                    return None;
                }
            };
            match serde_json::from_str::<PostEvent>(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, payload, "dropping malformed bus message");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// In-process `EventBus` backed by a tokio broadcast channel.
///
/// Gives single-process deployments (and tests) the same relay path as
/// Redis without the external dependency. Lagged subscribers lose the
/// overwritten events, matching the bus's best-effort contract.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<PostEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: &PostEvent) -> Result<(), NotifyError> {
        // No receivers is not an error; the event is simply unobserved.
        let _ = self.tx.send(*event);
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, NotifyError> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|result| async move {
            match result {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "local bus subscriber lagged");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;
    use uuid::Uuid;

    #[tokio::test]
    async fn local_bus_delivers_to_all_subscribers() {
        let bus = LocalBus::default();
        let mut a = bus.subscribe().await.unwrap();
        let mut b = bus.subscribe().await.unwrap();

        let event = PostEvent::new(Uuid::new_v4(), EventKind::Updated);
        bus.publish(&event).await.unwrap();

        assert_eq!(a.next().await, Some(event));
        assert_eq!(b.next().await, Some(event));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = LocalBus::default();
        bus.publish(&PostEvent::new(Uuid::new_v4(), EventKind::Deleted))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscription_only_sees_events_after_subscribe() {
        let bus = LocalBus::default();
        let missed = PostEvent::new(Uuid::new_v4(), EventKind::Created);
        bus.publish(&missed).await.unwrap();

        let mut events = bus.subscribe().await.unwrap();
        let seen = PostEvent::new(Uuid::new_v4(), EventKind::Published);
        bus.publish(&seen).await.unwrap();

        assert_eq!(events.next().await, Some(seen));
    }
}
