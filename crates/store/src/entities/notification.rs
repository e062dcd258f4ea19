//! Notification entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    /// Someone liked the recipient's activity.
    Like,
    /// Someone commented on the recipient's activity.
    Comment,
    /// Someone followed the recipient directly.
    Follow,
    /// Someone requested to follow the recipient.
    FollowRequest,
    /// The recipient's follow request was accepted.
    FollowAccepted,
}

impl NotificationKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Follow => "follow",
            Self::FollowRequest => "followRequest",
            Self::FollowAccepted => "followAccepted",
        }
    }
}

/// A notification delivered to a recipient.
///
/// Created server-side by the triggering action; the client only ever flips
/// the read flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique notification id
    pub id: String,

    /// The profile receiving the notification
    pub recipient_id: String,

    /// Notification kind
    pub kind: NotificationKind,

    /// The profile whose action triggered the notification
    pub source_profile_id: String,

    /// Related activity (for like and comment notifications)
    pub activity_id: Option<String>,

    /// Preview body (e.g. truncated comment text)
    pub body: Option<String>,

    /// Has this notification been read?
    pub is_read: bool,

    /// Creation time
    pub created_at: DateTime<Utc>,
}
