//! Collaborator interfaces to the authoritative store.
//!
//! The engine reaches the store through two seams: [`RemoteStore`] for
//! queries and mutations, [`ChangeFeed`] for push-based change hints. Both
//! are consumed as trait objects so tests and demos can substitute the
//! in-memory implementation or a failure-injecting wrapper.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::Stream;

use brewlog_common::SyncResult;

use crate::commands::{MutateCommand, StoreEntity};
use crate::entities::{
    Activity, Comment, FollowEdge, FollowRequest, Notification, Profile,
};
use crate::events::{ChangeEvent, Topic};

/// Which activities a feed covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedScope {
    /// The viewer's own activities plus those of every profile they follow.
    Following {
        /// Profile the feed belongs to.
        viewer_id: String,
    },
    /// A single profile's activities, as visible to the viewer.
    Profile {
        /// Profile looking at the feed.
        viewer_id: String,
        /// Profile whose activities are shown.
        profile_id: String,
    },
}

impl FeedScope {
    /// The viewer this feed is materialized for.
    #[must_use]
    pub fn viewer_id(&self) -> &str {
        match self {
            Self::Following { viewer_id } | Self::Profile { viewer_id, .. } => viewer_id,
        }
    }
}

/// Position of the last activity of a fetched page.
///
/// Pages are ordered by (`created_at`, id) descending and the next page
/// starts strictly after the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    /// Creation time of the last activity of the page.
    pub created_at: DateTime<Utc>,
    /// Id of that activity, the tiebreaker within one timestamp.
    pub id: String,
}

impl Cursor {
    /// Cursor pointing at `activity`.
    #[must_use]
    pub fn of(activity: &Activity) -> Self {
        Self {
            created_at: activity.created_at,
            id: activity.id.clone(),
        }
    }
}

/// Query and mutation surface of the authoritative store.
///
/// Reads return [`SyncError::NotFound`](brewlog_common::SyncError::NotFound)
/// for missing entities; every method may fail with `RemoteUnavailable`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch an activity with its nested likes and comments.
    async fn fetch_activity(&self, id: &str) -> SyncResult<Activity>;

    /// Fetch a page of activities for `scope`, strictly after `cursor`.
    async fn fetch_page(
        &self,
        scope: &FeedScope,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> SyncResult<Vec<Activity>>;

    /// Fetch a single comment.
    async fn fetch_comment(&self, id: &str) -> SyncResult<Comment>;

    /// Fetch a profile.
    async fn fetch_profile(&self, id: &str) -> SyncResult<Profile>;

    /// Fetch a single notification.
    async fn fetch_notification(&self, id: &str) -> SyncResult<Notification>;

    /// Fetch all notifications for a recipient, newest first.
    async fn fetch_notifications(&self, recipient_id: &str) -> SyncResult<Vec<Notification>>;

    /// Fetch a follow edge by id.
    async fn fetch_follow_edge(&self, id: &str) -> SyncResult<FollowEdge>;

    /// Find the follow edge between two profiles, if any.
    async fn follow_edge_between(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> SyncResult<Option<FollowEdge>>;

    /// Fetch every follow edge originating at `follower_id`.
    async fn fetch_followees(&self, follower_id: &str) -> SyncResult<Vec<FollowEdge>>;

    /// Fetch a follow request by id.
    async fn fetch_follow_request(&self, id: &str) -> SyncResult<FollowRequest>;

    /// Find the pending request between two profiles, if any.
    async fn pending_request_between(
        &self,
        requester_id: &str,
        target_id: &str,
    ) -> SyncResult<Option<FollowRequest>>;

    /// Fetch pending requests received by `target_id`, newest first.
    async fn fetch_received_requests(&self, target_id: &str) -> SyncResult<Vec<FollowRequest>>;

    /// Fetch pending requests sent by `requester_id`, newest first.
    async fn fetch_sent_requests(&self, requester_id: &str) -> SyncResult<Vec<FollowRequest>>;

    /// Apply a mutation and return the created or updated entity.
    async fn mutate(&self, command: MutateCommand) -> SyncResult<StoreEntity>;
}

/// Push-based change notification surface of the authoritative store.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription for events matching `topic`.
    async fn subscribe(&self, topic: Topic) -> SyncResult<Subscription>;

    /// Close the subscription identified by `token`.
    ///
    /// Closing an unknown or already-closed token is a no-op.
    async fn unsubscribe(&self, token: &str) -> SyncResult<()>;
}

/// Shared handle to a remote store.
pub type RemoteStoreService = Arc<dyn RemoteStore>;

/// Shared handle to a change feed.
pub type ChangeFeedService = Arc<dyn ChangeFeed>;

/// A live change-feed subscription.
///
/// Yields events matching one topic in arrival order. The subscription
/// detaches from the feed when [`unsubscribe`](Self::unsubscribe) is called
/// or when it is dropped, whichever comes first, so every subscribe pairs
/// with exactly one detach regardless of exit path.
pub struct Subscription {
    token: String,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Assemble a subscription from its parts.
    ///
    /// Called by [`ChangeFeed`] implementations; `detach` must remove the
    /// sending side from the feed's registry and must tolerate running after
    /// an explicit [`ChangeFeed::unsubscribe`] for the same token.
    #[must_use]
    pub fn new(
        token: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<ChangeEvent>,
        detach: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            token: token.into(),
            receiver,
            detach: Some(Box::new(detach)),
        }
    }

    /// Opaque handle identifying this subscription at the feed.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the feed has dropped its sending side and all
    /// buffered events are drained.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Detach from the feed, discarding buffered events.
    pub fn unsubscribe(mut self) {
        self.run_detach();
    }

    /// Adapt into a [`Stream`] of events.
    ///
    /// The subscription stays attached until the stream is dropped.
    #[must_use]
    pub fn into_stream(self) -> SubscriptionStream {
        SubscriptionStream { inner: self }
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// [`Stream`] adapter over a [`Subscription`].
#[derive(Debug)]
pub struct SubscriptionStream {
    inner: Subscription,
}

impl Stream for SubscriptionStream {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.receiver.poll_recv(cx)
    }
}
