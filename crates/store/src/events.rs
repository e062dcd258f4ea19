//! Change-event types emitted by the authoritative store.
//!
//! Events are hints: they carry identity, never payload. Consumers re-fetch
//! the named entity to observe its current state, so a delayed or duplicated
//! event converges to the same view as a timely one.

use serde::{Deserialize, Serialize};

/// Entity families carried on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// A brew activity.
    Activity,
    /// A comment on an activity.
    Comment,
    /// A member profile.
    Profile,
    /// A confirmed follow edge.
    FollowEdge,
    /// A follow request.
    FollowRequest,
    /// A notification.
    Notification,
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    /// The entity came into existence.
    Created,
    /// The entity's state changed.
    Updated,
    /// The entity is gone; consumers drop it without a re-fetch.
    Deleted,
}

/// A change hint for a single entity.
///
/// Like toggles surface as `Updated` events on the parent activity; comment
/// creation emits a `Created` event whose id names the comment itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Entity family of the changed entity.
    pub entity_kind: EntityKind,
    /// Id of the changed entity.
    pub entity_id: String,
    /// What happened.
    pub change: ChangeKind,
}

impl ChangeEvent {
    /// Build an event.
    #[must_use]
    pub fn new(entity_kind: EntityKind, entity_id: impl Into<String>, change: ChangeKind) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.into(),
            change,
        }
    }
}

/// Delivery scope of a subscription topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TopicScope {
    /// Every event of the kind.
    All,
    /// Only events addressed to this recipient (notifications, requests).
    Recipient(String),
}

/// A subscription topic: an entity kind plus a delivery scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// Entity family to receive events for.
    pub kind: EntityKind,
    /// Delivery scope.
    pub scope: TopicScope,
}

impl Topic {
    /// Topic covering every event of `kind`.
    #[must_use]
    pub const fn all(kind: EntityKind) -> Self {
        Self {
            kind,
            scope: TopicScope::All,
        }
    }

    /// Topic covering events of `kind` addressed to `recipient_id`.
    #[must_use]
    pub fn recipient(kind: EntityKind, recipient_id: impl Into<String>) -> Self {
        Self {
            kind,
            scope: TopicScope::Recipient(recipient_id.into()),
        }
    }

    /// Whether an event of `kind` addressed to `recipient` matches this topic.
    #[must_use]
    pub fn matches(&self, kind: EntityKind, recipient: Option<&str>) -> bool {
        if self.kind != kind {
            return false;
        }
        match &self.scope {
            TopicScope::All => true,
            TopicScope::Recipient(id) => recipient == Some(id.as_str()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_change_event_serialization() {
        let event = ChangeEvent::new(EntityKind::Activity, "a1", ChangeKind::Updated);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"entityKind\":\"activity\""));
        assert!(json.contains("\"entityId\":\"a1\""));
        assert!(json.contains("\"change\":\"updated\""));

        let parsed: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_topic_matches_all_scope() {
        let topic = Topic::all(EntityKind::Activity);

        assert!(topic.matches(EntityKind::Activity, None));
        assert!(topic.matches(EntityKind::Activity, Some("p1")));
        assert!(!topic.matches(EntityKind::Comment, None));
    }

    #[test]
    fn test_topic_matches_recipient_scope() {
        let topic = Topic::recipient(EntityKind::Notification, "p1");

        assert!(topic.matches(EntityKind::Notification, Some("p1")));
        assert!(!topic.matches(EntityKind::Notification, Some("p2")));
        assert!(!topic.matches(EntityKind::Notification, None));
        assert!(!topic.matches(EntityKind::FollowRequest, Some("p1")));
    }
}
