//! Notification event types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification about a post change for one user.
///
/// This is the full cross-process wire format: events carry no payload
/// beyond the subject and the kind of change, and consumers re-read state
/// from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEvent {
    /// The user whose posts changed.
    pub user_id: Uuid,
    /// What kind of change occurred.
    pub kind: EventKind,
}

/// The kind of post change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    Published,
}

impl PostEvent {
    pub fn new(user_id: Uuid, kind: EventKind) -> Self {
        Self { user_id, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_round_trips_through_json() {
        let event = PostEvent::new(Uuid::new_v4(), EventKind::Published);
        let json = serde_json::to_string(&event).unwrap();
        let back: PostEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventKind::Published).unwrap(),
            "\"published\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::Created).unwrap(),
            "\"created\""
        );
    }
}
