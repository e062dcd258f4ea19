//! Session wiring.
//!
//! [`SyncSession`] assembles the engine for one signed-in viewer: it
//! constructs the reconciler, follow graph, notification aggregator and
//! mutation coordinator over shared store handles, opens the change-feed
//! subscriptions each component consumes, and spawns their event loops.
//! [`close`](SyncSession::close) tears all of that down again, pairing every
//! subscribe with exactly one unsubscribe.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use brewlog_common::{Config, SyncError, SyncResult};
use brewlog_store::{ChangeFeedService, EntityKind, FeedScope, RemoteStoreService, Topic};

use crate::follow_graph::FollowGraph;
use crate::mutation::MutationCoordinator;
use crate::notifications::NotificationAggregator;
use crate::reconciler::{FeedReconciler, ViewUpdate};
use crate::retry::RetryPolicy;

/// A running sync engine for one viewer.
pub struct SyncSession {
    viewer_id: String,
    reconciler: FeedReconciler,
    coordinator: MutationCoordinator,
    follow_graph: FollowGraph,
    notifications: NotificationAggregator,
    feed: ChangeFeedService,
    tokens: Vec<String>,
    workers: Vec<JoinHandle<()>>,
    bridge: JoinHandle<()>,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("viewer_id", &self.viewer_id)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl SyncSession {
    /// Build the engine, perform the initial loads, and start the event
    /// loops.
    ///
    /// # Errors
    ///
    /// Fails if `scope` belongs to a different viewer, or if any initial
    /// load or subscription fails after retries. On failure every
    /// already-opened subscription detaches on drop, so nothing leaks.
    pub async fn start(
        store: RemoteStoreService,
        feed: ChangeFeedService,
        viewer_id: impl Into<String>,
        scope: FeedScope,
        config: &Config,
    ) -> SyncResult<Self> {
        let viewer_id = viewer_id.into();
        if scope.viewer_id() != viewer_id {
            return Err(SyncError::Validation(format!(
                "feed scope belongs to viewer {}, session is for {viewer_id}",
                scope.viewer_id()
            )));
        }

        let retry = RetryPolicy::from_config(&config.retry);
        let reconciler = FeedReconciler::new(
            store.clone(),
            scope,
            config.feed.page_size,
            retry.clone(),
        );
        let follow_graph = FollowGraph::new(store.clone(), viewer_id.clone(), retry.clone());
        let notifications = NotificationAggregator::new(store.clone(), viewer_id.clone(), retry);
        let coordinator = MutationCoordinator::new(
            store,
            viewer_id.clone(),
            reconciler.clone(),
            follow_graph.clone(),
        );

        // Subscribe before loading so nothing slips between snapshot and
        // stream; events buffer until the loops start draining them.
        let activity_sub = feed.subscribe(Topic::all(EntityKind::Activity)).await?;
        let comment_sub = feed.subscribe(Topic::all(EntityKind::Comment)).await?;
        let edge_sub = feed.subscribe(Topic::all(EntityKind::FollowEdge)).await?;
        let request_sub = feed.subscribe(Topic::all(EntityKind::FollowRequest)).await?;
        let notification_sub = feed
            .subscribe(Topic::recipient(EntityKind::Notification, &viewer_id))
            .await?;
        let inbox_request_sub = feed
            .subscribe(Topic::recipient(EntityKind::FollowRequest, &viewer_id))
            .await?;
        let tokens = vec![
            activity_sub.token().to_string(),
            comment_sub.token().to_string(),
            edge_sub.token().to_string(),
            request_sub.token().to_string(),
            notification_sub.token().to_string(),
            inbox_request_sub.token().to_string(),
        ];

        reconciler.load_initial().await?;
        follow_graph.load().await?;
        notifications.load().await?;

        let bridge = spawn_overlay_bridge(reconciler.clone(), coordinator.clone());
        let workers = vec![
            tokio::spawn(reconciler.clone().run(vec![activity_sub, comment_sub])),
            tokio::spawn(follow_graph.clone().run(vec![edge_sub, request_sub])),
            tokio::spawn(
                notifications
                    .clone()
                    .run(vec![notification_sub, inbox_request_sub]),
            ),
        ];

        tracing::debug!(viewer_id = %viewer_id, "Sync session started");
        Ok(Self {
            viewer_id,
            reconciler,
            coordinator,
            follow_graph,
            notifications,
            feed,
            tokens,
            workers,
            bridge,
        })
    }

    /// The viewer this session belongs to.
    #[must_use]
    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    /// The feed reconciler.
    #[must_use]
    pub const fn reconciler(&self) -> &FeedReconciler {
        &self.reconciler
    }

    /// The mutation coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    /// The follow graph.
    #[must_use]
    pub const fn follow_graph(&self) -> &FollowGraph {
        &self.follow_graph
    }

    /// The notification aggregator.
    #[must_use]
    pub const fn notifications(&self) -> &NotificationAggregator {
        &self.notifications
    }

    /// Unsubscribe from the change feed and wait for the loops to stop.
    pub async fn close(self) {
        for token in &self.tokens {
            if let Err(err) = self.feed.unsubscribe(token).await {
                tracing::warn!(error = %err, token = %token, "Unsubscribe failed during close");
            }
        }
        // With the senders gone the event loops drain and return.
        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "Event loop ended abnormally during close");
            }
        }
        // The bridge never sees its channel close while the session's own
        // reconciler handle is alive, so it is stopped explicitly.
        self.bridge.abort();
        if let Err(err) = self.bridge.await
            && !err.is_cancelled()
        {
            tracing::warn!(error = %err, "Overlay bridge ended abnormally during close");
        }
        tracing::debug!(viewer_id = %self.viewer_id, "Sync session closed");
    }
}

/// Forward reconciled view updates to the coordinator so settled overlay
/// entries are pruned once the view reflects them.
fn spawn_overlay_bridge(
    reconciler: FeedReconciler,
    coordinator: MutationCoordinator,
) -> JoinHandle<()> {
    let mut updates = reconciler.subscribe_updates();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(ViewUpdate::Inserted(id) | ViewUpdate::Replaced(id)) => {
                    if let Some(activity) = reconciler.get(&id).await {
                        coordinator.observe_reconciled(&activity);
                    }
                }
                Ok(ViewUpdate::Removed(id)) => coordinator.discard_overlay(&id),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Overlay bridge lagged behind view updates");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
