//! Follow request entity (pending follow requests for private profiles).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a follow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FollowRequestStatus {
    /// Awaiting the target's decision.
    Pending,
    /// Approved; terminal.
    Accepted,
    /// Declined; terminal.
    Rejected,
}

/// A pending or settled follow request.
///
/// At most one `Pending` request exists per (requester, target) pair.
/// Settled requests keep their terminal status and do not block a fresh
/// request for the same pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequest {
    /// Unique request id
    pub id: String,

    /// The profile that sent the request
    pub requester_id: String,

    /// The profile that received the request
    pub target_id: String,

    /// Lifecycle status
    pub status: FollowRequestStatus,

    /// When the request was filed
    pub created_at: DateTime<Utc>,
}

impl FollowRequest {
    /// Whether this request still awaits a decision.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, FollowRequestStatus::Pending)
    }
}
