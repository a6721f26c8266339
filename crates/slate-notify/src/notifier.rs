//! Per-subject subscriber registry with cross-process relay.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{EventBus, EventKind, PostEvent};

/// Buffer capacity of each subscriber channel. A subscriber whose buffer is
/// full is skipped for that event rather than blocking the sender.
pub const CHANNEL_CAPACITY: usize = 10;

struct LocalSubscriber {
    token: u64,
    tx: mpsc::Sender<PostEvent>,
}

/// A live subscription for one subject.
///
/// The receiving half is owned by whoever called [`Notifier::subscribe`];
/// hand it back via [`Notifier::unsubscribe`] when the consumer detaches so
/// the registry entry is removed and the channel closed.
pub struct Subscription {
    user_id: Uuid,
    token: u64,
    rx: mpsc::Receiver<PostEvent>,
}

impl Subscription {
    /// Wait for the next event. `None` once the subscription is removed
    /// from the registry and the buffer is drained.
    pub async fn recv(&mut self) -> Option<PostEvent> {
        self.rx.recv().await
    }

    /// Receive without waiting, if an event is buffered.
    pub fn try_recv(&mut self) -> Option<PostEvent> {
        self.rx.try_recv().ok()
    }

    /// The subject this subscription watches.
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

/// Delivers post-change events to local subscribers and mirrors them across
/// processes via the broadcast bus.
///
/// The registry is strictly process-local; other processes see events only
/// through the bus relay. Cloning shares the same registry.
#[derive(Clone)]
pub struct Notifier {
    subscribers: Arc<RwLock<HashMap<Uuid, Vec<LocalSubscriber>>>>,
    bus: Option<Arc<dyn EventBus>>,
    next_token: Arc<AtomicU64>,
}

impl Notifier {
    /// A notifier without a cross-process bus. Events reach local
    /// subscribers only.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            bus: None,
            next_token: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A notifier that also publishes every event on `bus` and can relay
    /// bus events to local subscribers (see [`Notifier::run_relay`]).
    pub fn with_bus(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new()
        }
    }

    /// Register a new subscriber for a user. Multiple concurrent
    /// subscriptions per user are allowed (multiple devices/tabs).
    pub async fn subscribe(&self, user_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(LocalSubscriber { token, tx });

        Subscription { user_id, token, rx }
    }

    /// Remove a subscription from the registry, closing its channel. The
    /// user's entry is dropped entirely once its last subscriber is gone.
    pub async fn unsubscribe(&self, sub: Subscription) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(entries) = subscribers.get_mut(&sub.user_id) {
            entries.retain(|s| s.token != sub.token);
            if entries.is_empty() {
                subscribers.remove(&sub.user_id);
            }
        }
        // Dropping `sub.rx` here; the sender side was just dropped from the
        // registry, so the channel is fully closed.
    }

    /// Deliver an event to all local subscribers for the user, then publish
    /// it on the bus for other processes.
    pub async fn notify(&self, user_id: Uuid, kind: EventKind) {
        let event = PostEvent::new(user_id, kind);

        let delivered = self.notify_local(&event).await;
        debug!(user_id = %user_id, kind = ?kind, delivered, "notified local subscribers");

        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(&event).await {
                warn!(user_id = %user_id, error = %e, "failed to publish event on bus");
            }
        }
    }

    /// Local delivery only. Sends are non-blocking: a subscriber whose
    /// buffer is full is skipped for this event. Returns the number of
    /// subscribers that received it.
    async fn notify_local(&self, event: &PostEvent) -> usize {
        let subscribers = self.subscribers.read().await;
        let Some(entries) = subscribers.get(&event.user_id) else {
            return 0;
        };

        let mut sent = 0;
        for sub in entries {
            match sub.tx.try_send(*event) {
                Ok(()) => sent += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(user_id = %event.user_id, "subscriber buffer full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver dropped without unsubscribing; it will be
                    // swept when the owner finally unsubscribes.
                    debug!(user_id = %event.user_id, "subscriber channel closed");
                }
            }
        }
        sent
    }

    /// Relay loop: read events published by other processes and deliver
    /// them to local subscribers. Local delivery only, never re-published,
    /// so events cannot loop between processes.
    ///
    /// Runs until the bus stream ends or `shutdown_rx` flips to true. A
    /// notifier without a bus returns immediately.
    pub async fn run_relay(self, mut shutdown_rx: watch::Receiver<bool>) {
        let Some(bus) = self.bus.clone() else {
            return;
        };

        let mut events = match bus.subscribe().await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "failed to subscribe to event bus");
                return;
            }
        };
        info!("notifier relay listening for cross-process events");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender means no shutdown signal will ever
                    // arrive; treat it as one.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = events.next() => {
                    match event {
                        Some(event) => {
                            let delivered = self.notify_local(&event).await;
                            debug!(
                                user_id = %event.user_id,
                                kind = ?event.kind,
                                delivered,
                                "relayed bus event to local subscribers"
                            );
                        }
                        None => {
                            warn!("event bus stream ended");
                            break;
                        }
                    }
                }
            }
        }

        info!("notifier relay stopped");
    }

    /// Number of active subscriptions for one user. Observability only.
    pub async fn subscriber_count(&self, user_id: Uuid) -> usize {
        self.subscribers
            .read()
            .await
            .get(&user_id)
            .map_or(0, Vec::len)
    }

    /// Total active subscriptions across all users. Observability only.
    pub async fn total_subscribers(&self) -> usize {
        self.subscribers.read().await.values().map(Vec::len).sum()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalBus;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn notify_reaches_every_subscriber_for_the_user() {
        let notifier = Notifier::new();
        let user = Uuid::new_v4();

        let mut first = notifier.subscribe(user).await;
        let mut second = notifier.subscribe(user).await;
        assert_eq!(notifier.subscriber_count(user).await, 2);

        notifier.notify(user, EventKind::Updated).await;

        let event = PostEvent::new(user, EventKind::Updated);
        assert_eq!(first.recv().await, Some(event));
        assert_eq!(second.recv().await, Some(event));
    }

    #[tokio::test]
    async fn notify_is_scoped_to_the_subject() {
        let notifier = Notifier::new();
        let watcher = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mut sub = notifier.subscribe(watcher).await;
        notifier.notify(other, EventKind::Created).await;

        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn full_buffer_drops_event_without_blocking() {
        let notifier = Notifier::new();
        let user = Uuid::new_v4();
        let mut sub = notifier.subscribe(user).await;

        for _ in 0..CHANNEL_CAPACITY {
            notifier.notify(user, EventKind::Updated).await;
        }
        // The buffer is full; this must return promptly and drop the event
        // for this subscriber only.
        timeout(
            Duration::from_secs(1),
            notifier.notify(user, EventKind::Published),
        )
        .await
        .expect("notify must not block on a full subscriber buffer");

        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel_and_cleans_registry() {
        let notifier = Notifier::new();
        let user = Uuid::new_v4();

        let first = notifier.subscribe(user).await;
        let second = notifier.subscribe(user).await;

        notifier.unsubscribe(first).await;
        assert_eq!(notifier.subscriber_count(user).await, 1);

        notifier.unsubscribe(second).await;
        assert_eq!(notifier.subscriber_count(user).await, 0);
        assert_eq!(notifier.total_subscribers().await, 0);
    }

    #[tokio::test]
    async fn unsubscribed_channel_stops_receiving() {
        let notifier = Notifier::new();
        let user = Uuid::new_v4();

        let sub = notifier.subscribe(user).await;
        let mut kept = notifier.subscribe(user).await;
        notifier.unsubscribe(sub).await;

        notifier.notify(user, EventKind::Deleted).await;
        assert_eq!(
            kept.recv().await,
            Some(PostEvent::new(user, EventKind::Deleted))
        );
    }

    #[tokio::test]
    async fn relay_stops_when_shutdown_sender_is_dropped() {
        let bus: Arc<dyn EventBus> = Arc::new(LocalBus::default());
        let notifier = Notifier::with_bus(bus);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        // The bus stream stays open, so only the closed shutdown channel
        // can end the loop; it must not spin on it forever.
        timeout(Duration::from_secs(1), notifier.run_relay(shutdown_rx))
            .await
            .expect("relay did not stop after its shutdown sender went away");
    }

    #[tokio::test]
    async fn relay_delivers_events_from_another_process() {
        // Two notifier instances sharing one bus stand in for two OS
        // processes: the publisher never touches the receiver's registry.
        let bus: Arc<dyn EventBus> = Arc::new(LocalBus::default());
        let publisher = Notifier::with_bus(bus.clone());
        let receiver = Notifier::with_bus(bus);

        let user = Uuid::new_v4();
        let mut sub = receiver.subscribe(user).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let relay = tokio::spawn(receiver.clone().run_relay(shutdown_rx));
        // Give the relay a moment to open its bus subscription.
        tokio::time::sleep(Duration::from_millis(50)).await;

        publisher.notify(user, EventKind::Published).await;

        let event = timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("relay should forward the event")
            .expect("subscription should be open");
        assert_eq!(event, PostEvent::new(user, EventKind::Published));

        shutdown_tx.send(true).unwrap();
        relay.await.unwrap();
    }

    #[tokio::test]
    async fn relay_without_bus_returns_immediately() {
        let notifier = Notifier::new();
        let (_tx, rx) = watch::channel(false);
        timeout(Duration::from_secs(1), notifier.run_relay(rx))
            .await
            .expect("bus-less relay must return at once");
    }
}
