//! Notification aggregation.
//!
//! Maintains the viewer's notification list and incoming follow requests as
//! one consistent pair of views. Both are recomputed together under a single
//! lock and published through a watch channel, so a consumer can never
//! observe a badge count that disagrees with the lists it was derived from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::stream::select_all;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use brewlog_common::{SyncError, SyncResult};
use brewlog_store::{
    ChangeEvent, ChangeKind, EntityKind, FollowRequest, MutateCommand, Notification,
    RemoteStoreService, Subscription,
};

use crate::retry::RetryPolicy;

/// Snapshot of the viewer's notification surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationFeed {
    /// All notifications, newest first.
    pub all: Vec<Notification>,
    /// Pending follow requests targeting the viewer, newest first.
    pub requests: Vec<FollowRequest>,
}

impl NotificationFeed {
    /// Badge count: unread notifications plus undecided requests.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.all.iter().filter(|n| !n.is_read).count() + self.requests.len()
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    notifications: HashMap<String, Notification>,
    /// Pending requests only; settled ones drop out.
    requests: HashMap<String, FollowRequest>,
}

impl AggregatorState {
    fn to_feed(&self) -> NotificationFeed {
        let mut all: Vec<Notification> = self.notifications.values().cloned().collect();
        all.sort_by(|a, b| (b.created_at, b.id.as_str()).cmp(&(a.created_at, a.id.as_str())));
        let mut requests: Vec<FollowRequest> = self.requests.values().cloned().collect();
        requests.sort_by(|a, b| (b.created_at, b.id.as_str()).cmp(&(a.created_at, a.id.as_str())));
        NotificationFeed { all, requests }
    }
}

/// Aggregates notifications and incoming follow requests for one viewer.
#[derive(Clone)]
pub struct NotificationAggregator {
    store: RemoteStoreService,
    viewer_id: String,
    retry: RetryPolicy,
    state: Arc<Mutex<AggregatorState>>,
    feed_tx: watch::Sender<NotificationFeed>,
}

impl NotificationAggregator {
    /// Create an empty aggregator for `viewer_id`.
    #[must_use]
    pub fn new(store: RemoteStoreService, viewer_id: impl Into<String>, retry: RetryPolicy) -> Self {
        let (feed_tx, _) = watch::channel(NotificationFeed::default());
        Self {
            store,
            viewer_id: viewer_id.into(),
            retry,
            state: Arc::new(Mutex::new(AggregatorState::default())),
            feed_tx,
        }
    }

    /// Current snapshot of both views.
    #[must_use]
    pub fn feed(&self) -> NotificationFeed {
        self.feed_tx.borrow().clone()
    }

    /// Badge count derived from the current sets.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        let state = self.lock();
        state.notifications.values().filter(|n| !n.is_read).count() + state.requests.len()
    }

    /// Watch both views; the receiver always holds the latest snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NotificationFeed> {
        self.feed_tx.subscribe()
    }

    /// The views as a stream of snapshots.
    #[must_use]
    pub fn feed_stream(&self) -> WatchStream<NotificationFeed> {
        WatchStream::new(self.feed_tx.subscribe())
    }

    /// Rebuild both views from the store.
    pub async fn load(&self) -> SyncResult<NotificationFeed> {
        let notifications = self
            .retry
            .run("load notifications", || {
                let store = self.store.clone();
                let viewer = self.viewer_id.clone();
                async move { store.fetch_notifications(&viewer).await }
            })
            .await?;
        let requests = self
            .retry
            .run("load received follow requests", || {
                let store = self.store.clone();
                let viewer = self.viewer_id.clone();
                async move { store.fetch_received_requests(&viewer).await }
            })
            .await?;

        let mut state = self.lock();
        state.notifications = notifications
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        state.requests = requests.into_iter().map(|r| (r.id.clone(), r)).collect();
        Ok(self.publish(&state))
    }

    /// Mark one notification as read.
    ///
    /// Already-read notifications are a local no-op. On store failure the
    /// local flip is reverted and the error propagates.
    pub async fn mark_read(&self, notification_id: &str) -> SyncResult<()> {
        {
            let mut state = self.lock();
            let notification = state.notifications.get_mut(notification_id).ok_or_else(|| {
                SyncError::NotFound(format!("notification {notification_id}"))
            })?;
            if notification.is_read {
                return Ok(());
            }
            notification.is_read = true;
            self.publish(&state);
        }

        let result = self
            .store
            .mutate(MutateCommand::MarkNotificationRead {
                notification_id: notification_id.to_string(),
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mut state = self.lock();
                if let Some(notification) = state.notifications.get_mut(notification_id) {
                    notification.is_read = false;
                }
                self.publish(&state);
                tracing::warn!(
                    error = %err,
                    notification_id = %notification_id,
                    "Mark-read failed, reverted"
                );
                Err(err)
            }
        }
    }

    /// Consume change streams until every sender is dropped.
    pub async fn run(self, subscriptions: Vec<Subscription>) {
        let mut events = select_all(subscriptions.into_iter().map(Subscription::into_stream));
        while let Some(event) = events.next().await {
            self.handle_event(event).await;
        }
        tracing::debug!("Change streams closed, notification aggregator stopping");
    }

    /// Fold one change hint into the views.
    pub async fn handle_event(&self, event: ChangeEvent) {
        match event.entity_kind {
            EntityKind::Notification => {
                self.reconcile_notification(&event.entity_id, event.change)
                    .await;
            }
            EntityKind::FollowRequest => {
                self.reconcile_request(&event.entity_id, event.change).await;
            }
            _ => {}
        }
    }

    async fn reconcile_notification(&self, id: &str, change: ChangeKind) {
        match change {
            ChangeKind::Created | ChangeKind::Updated => {
                let fetched = self
                    .retry
                    .run("re-fetch notification", || {
                        let store = self.store.clone();
                        let id = id.to_string();
                        async move { store.fetch_notification(&id).await }
                    })
                    .await;
                match fetched {
                    Ok(notification) => {
                        if notification.recipient_id != self.viewer_id {
                            return;
                        }
                        let mut state = self.lock();
                        state
                            .notifications
                            .insert(notification.id.clone(), notification);
                        self.publish(&state);
                    }
                    Err(SyncError::NotFound(_)) => self.drop_notification(id),
                    Err(err) => {
                        tracing::warn!(error = %err, notification_id = %id, "Notification re-fetch failed");
                    }
                }
            }
            ChangeKind::Deleted => self.drop_notification(id),
        }
    }

    async fn reconcile_request(&self, id: &str, change: ChangeKind) {
        match change {
            ChangeKind::Created | ChangeKind::Updated => {
                let fetched = self
                    .retry
                    .run("re-fetch follow request", || {
                        let store = self.store.clone();
                        let id = id.to_string();
                        async move { store.fetch_follow_request(&id).await }
                    })
                    .await;
                match fetched {
                    Ok(request) => {
                        let mut state = self.lock();
                        if request.target_id == self.viewer_id && request.is_pending() {
                            state.requests.insert(request.id.clone(), request);
                        } else {
                            state.requests.remove(&request.id);
                        }
                        self.publish(&state);
                    }
                    Err(SyncError::NotFound(_)) => self.drop_request(id),
                    Err(err) => {
                        tracing::warn!(error = %err, request_id = %id, "Follow request re-fetch failed");
                    }
                }
            }
            ChangeKind::Deleted => self.drop_request(id),
        }
    }

    fn drop_notification(&self, id: &str) {
        let mut state = self.lock();
        if state.notifications.remove(id).is_some() {
            self.publish(&state);
        }
    }

    fn drop_request(&self, id: &str) {
        let mut state = self.lock();
        if state.requests.remove(id).is_some() {
            self.publish(&state);
        }
    }

    /// Recompute both views from the sets and push them to watchers.
    fn publish(&self, state: &AggregatorState) -> NotificationFeed {
        let feed = state.to_feed();
        self.feed_tx.send_replace(feed.clone());
        feed
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
