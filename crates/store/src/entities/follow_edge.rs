//! Follow edge entity (confirmed follow relationships between profiles).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A confirmed follow relationship.
///
/// At most one edge exists per (follower, followee) pair. Its existence
/// grants the follower visibility into the followee's private activities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEdge {
    /// Unique edge id
    pub id: String,

    /// The profile who is following
    pub follower_id: String,

    /// The profile being followed
    pub followee_id: String,

    /// When the follow was confirmed
    pub created_at: DateTime<Utc>,
}
