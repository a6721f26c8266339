//! Server-Sent Events feed for one connected client.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use slate_notify::Notifier;
use slate_store::PostStore;

use crate::fingerprint;

/// Stream timing knobs.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Coarse re-snapshot interval; a safety net under the event-driven
    /// pushes.
    pub update_interval: Duration,
    /// Keepalive cadence holding the transport open through proxies.
    pub keepalive_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamMessage {
    Connected,
    Update(String),
    Keepalive,
}

/// SSE feed of a user's posts: a `connected` event, an initial snapshot,
/// an `update` event whenever the watched lists change, and periodic
/// keepalive comments.
///
/// The feed ends and the notifier subscription is released when the client
/// disconnects.
pub fn post_stream(
    store: Arc<dyn PostStore>,
    notifier: Notifier,
    user_id: Uuid,
    config: StreamConfig,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(run_stream(store, notifier, user_id, config, tx));

    let stream = ReceiverStream::new(rx).map(|msg| Ok(to_event(msg)));
    Sse::new(stream)
}

fn to_event(msg: StreamMessage) -> Event {
    match msg {
        StreamMessage::Connected => Event::default()
            .event("connected")
            .data(r#"{"status":"connected"}"#),
        StreamMessage::Update(json) => Event::default().event("update").data(json),
        StreamMessage::Keepalive => Event::default().comment("keepalive"),
    }
}

async fn run_stream(
    store: Arc<dyn PostStore>,
    notifier: Notifier,
    user_id: Uuid,
    config: StreamConfig,
    tx: mpsc::Sender<StreamMessage>,
) {
    let mut sub = notifier.subscribe(user_id).await;
    info!(user_id = %user_id, "post stream attached");

    // Fingerprints of the last pushed lists; the empty strings guarantee
    // the initial snapshot always goes out.
    let mut last = (String::new(), String::new());

    let connected = tx.send(StreamMessage::Connected).await.is_ok()
        && push_if_changed(&*store, user_id, &mut last, &tx).await;
    if !connected {
        notifier.unsubscribe(sub).await;
        return;
    }

    let mut update_tick = tokio::time::interval(config.update_interval);
    update_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    update_tick.tick().await; // consume the immediate first tick
    let mut keepalive_tick = tokio::time::interval(config.keepalive_interval);
    keepalive_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    keepalive_tick.tick().await;

    loop {
        tokio::select! {
            event = sub.recv() => {
                match event {
                    Some(event) => {
                        debug!(user_id = %user_id, kind = ?event.kind, "refreshing stream on notification");
                        if !push_if_changed(&*store, user_id, &mut last, &tx).await {
                            break;
                        }
                    }
                    // Registry torn down under us; nothing left to relay.
                    None => break,
                }
            }
            _ = update_tick.tick() => {
                if !push_if_changed(&*store, user_id, &mut last, &tx).await {
                    break;
                }
            }
            _ = keepalive_tick.tick() => {
                if tx.send(StreamMessage::Keepalive).await.is_err() {
                    break;
                }
            }
        }
    }

    notifier.unsubscribe(sub).await;
    info!(user_id = %user_id, "post stream detached");
}

/// Re-read the watched lists and push a snapshot if they changed since the
/// last push. Returns false once the client is gone.
async fn push_if_changed(
    store: &dyn PostStore,
    user_id: Uuid,
    last: &mut (String, String),
    tx: &mpsc::Sender<StreamMessage>,
) -> bool {
    match snapshot_if_changed(store, user_id, last).await {
        Some(msg) => tx.send(msg).await.is_ok(),
        None => true,
    }
}

/// Build an update snapshot unless the fingerprints match the previous
/// push. Store errors behave like "no change": logged and retried on the
/// next trigger.
async fn snapshot_if_changed(
    store: &dyn PostStore,
    user_id: Uuid,
    last: &mut (String, String),
) -> Option<StreamMessage> {
    let upcoming = match store.upcoming_posts(user_id).await {
        Ok(posts) => posts,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "failed to load upcoming posts for stream");
            return None;
        }
    };
    let history = match store.published_posts(user_id).await {
        Ok(posts) => posts,
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "failed to load post history for stream");
            return None;
        }
    };

    let current = (fingerprint(&upcoming), fingerprint(&history));
    if current == *last {
        return None;
    }
    *last = current;

    let json = serde_json::json!({
        "upcoming": upcoming,
        "history": history,
    })
    .to_string();
    Some(StreamMessage::Update(json))
}
