//! Mutation commands accepted by the authoritative store.

use serde::{Deserialize, Serialize};
use validator::Validate;

use brewlog_common::{SyncError, SyncResult};

use crate::entities::{Activity, Comment, FollowEdge, FollowRequest, Notification};

/// Decision on a pending follow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FollowDecision {
    /// The target approved the request.
    Accepted,
    /// The target declined the request.
    Rejected,
}

/// A draft for a new comment.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct CommentDraft {
    /// Comment text.
    #[validate(length(min = 1, max = 1000))]
    pub text: String,
}

impl CommentDraft {
    /// Draft with the given text, not yet validated.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Content fields of an activity, used when creating or editing one.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDraft {
    /// Brew method (e.g. "v60", "aeropress").
    #[validate(length(min = 1, max = 64))]
    pub method: String,
    /// Coffee name.
    #[validate(length(min = 1, max = 200))]
    pub coffee_name: String,
    /// Ground coffee dose in grams.
    pub dose_grams: u32,
    /// Brew water in grams.
    pub water_grams: u32,
    /// Free-text tasting notes.
    pub notes: Option<String>,
}

/// Commands accepted by [`RemoteStore::mutate`](crate::remote::RemoteStore::mutate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MutateCommand {
    /// Add or remove `profile_id`'s like on an activity.
    ToggleLike {
        /// Activity being liked or unliked.
        activity_id: String,
        /// Profile whose like is toggled.
        profile_id: String,
    },
    /// Append a comment to an activity.
    AddComment {
        /// Activity being commented on.
        activity_id: String,
        /// Comment author.
        author_id: String,
        /// Comment text.
        text: String,
    },
    /// Create a confirmed follow edge (public targets only).
    CreateFollowEdge {
        /// Profile doing the following.
        follower_id: String,
        /// Profile being followed.
        followee_id: String,
    },
    /// Remove a follow edge.
    DeleteFollowEdge {
        /// Profile doing the unfollowing.
        follower_id: String,
        /// Profile being unfollowed.
        followee_id: String,
    },
    /// File a follow request against a private target.
    CreateFollowRequest {
        /// Profile asking to follow.
        requester_id: String,
        /// Private profile being asked.
        target_id: String,
    },
    /// Settle a pending follow request.
    RespondFollowRequest {
        /// Pending request being settled.
        request_id: String,
        /// Outcome to record.
        decision: FollowDecision,
    },
    /// Mark a notification as read.
    MarkNotificationRead {
        /// Notification to mark.
        notification_id: String,
    },
}

/// The entity produced by a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEntity {
    /// A brew activity.
    Activity(Activity),
    /// A comment on an activity.
    Comment(Comment),
    /// A confirmed follow edge.
    FollowEdge(FollowEdge),
    /// A follow request.
    FollowRequest(FollowRequest),
    /// A notification.
    Notification(Notification),
}

impl StoreEntity {
    /// Unwrap an activity reply.
    pub fn into_activity(self) -> SyncResult<Activity> {
        match self {
            Self::Activity(activity) => Ok(activity),
            other => Err(unexpected_entity("activity", &other)),
        }
    }

    /// Unwrap a comment reply.
    pub fn into_comment(self) -> SyncResult<Comment> {
        match self {
            Self::Comment(comment) => Ok(comment),
            other => Err(unexpected_entity("comment", &other)),
        }
    }

    /// Unwrap a follow edge reply.
    pub fn into_follow_edge(self) -> SyncResult<FollowEdge> {
        match self {
            Self::FollowEdge(edge) => Ok(edge),
            other => Err(unexpected_entity("followEdge", &other)),
        }
    }

    /// Unwrap a follow request reply.
    pub fn into_follow_request(self) -> SyncResult<FollowRequest> {
        match self {
            Self::FollowRequest(request) => Ok(request),
            other => Err(unexpected_entity("followRequest", &other)),
        }
    }

    /// Unwrap a notification reply.
    pub fn into_notification(self) -> SyncResult<Notification> {
        match self {
            Self::Notification(notification) => Ok(notification),
            other => Err(unexpected_entity("notification", &other)),
        }
    }

    /// Wire name of the carried entity family.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Activity(_) => "activity",
            Self::Comment(_) => "comment",
            Self::FollowEdge(_) => "followEdge",
            Self::FollowRequest(_) => "followRequest",
            Self::Notification(_) => "notification",
        }
    }
}

fn unexpected_entity(wanted: &str, got: &StoreEntity) -> SyncError {
    SyncError::Internal(format!(
        "store returned {} where {wanted} was expected",
        got.kind_name()
    ))
}
