//! Cross-process notification fan-out for Slate.
//!
//! A `Notifier` delivers post-change events to local subscribers over
//! bounded channels, and synchronizes delivery across processes via an
//! `EventBus` (Redis pub/sub in production, an in-process bus for tests and
//! single-process deployments). Delivery is best-effort: events are not
//! persisted, not deduplicated, and dropped on full buffers.

mod bus;
mod error;
mod notifier;
mod types;

pub use bus::{DEFAULT_BUS_CHANNEL, EventBus, EventStream, LocalBus, RedisBus};
pub use error::NotifyError;
pub use notifier::{CHANNEL_CAPACITY, Notifier, Subscription};
pub use types::{EventKind, PostEvent};
