//! Optimistic mutation coordination.
//!
//! Applies viewer-issued mutations against the store with an optimistic
//! presentation layer on top of the reconciled feed. Mutations that target
//! the same entity are serialized through a keyed queue; failures roll the
//! optimistic layer back to the last acknowledged state and surface the
//! error to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use validator::Validate;

use brewlog_common::{SyncError, SyncResult};
use brewlog_store::{Activity, CommentDraft, MutateCommand, RemoteStoreService, StoreEntity};

use crate::follow_graph::FollowGraph;
use crate::keyed::KeyedQueue;
use crate::overlay::{LikeOverlay, LikeView};
use crate::reconciler::FeedReconciler;

/// A viewer-issued mutation.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Toggle the viewer's like on an activity in the loaded view.
    ToggleLike {
        /// Target activity.
        activity_id: String,
    },
    /// Append a comment to an activity in the loaded view.
    AddComment {
        /// Parent activity.
        activity_id: String,
        /// Comment body.
        text: String,
    },
    /// Follow a profile, or request to when it is private.
    Follow {
        /// Target profile.
        target_id: String,
    },
    /// Stop following a profile.
    Unfollow {
        /// Target profile.
        target_id: String,
    },
}

/// Serialization key: one queue lane per target entity and operation family.
///
/// Follow and unfollow share a lane so they cannot reorder against each
/// other; likes and comments on the same activity run on separate lanes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MutationKey {
    target: String,
    kind: MutationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MutationKind {
    Like,
    Comment,
    Follow,
}

#[derive(Debug, Default)]
struct OverlayState {
    likes: HashMap<String, LikeOverlay>,
    /// Count of comment submissions still in flight per activity.
    pending_comments: HashMap<String, u32>,
}

/// Applies mutations optimistically and reconciles them with the store.
#[derive(Clone)]
pub struct MutationCoordinator {
    store: RemoteStoreService,
    viewer_id: String,
    reconciler: FeedReconciler,
    follow_graph: FollowGraph,
    overlay: Arc<Mutex<OverlayState>>,
    queue: KeyedQueue<MutationKey>,
}

impl MutationCoordinator {
    /// Create a coordinator for one viewer.
    #[must_use]
    pub fn new(
        store: RemoteStoreService,
        viewer_id: impl Into<String>,
        reconciler: FeedReconciler,
        follow_graph: FollowGraph,
    ) -> Self {
        Self {
            store,
            viewer_id: viewer_id.into(),
            reconciler,
            follow_graph,
            overlay: Arc::new(Mutex::new(OverlayState::default())),
            queue: KeyedQueue::new(),
        }
    }

    /// Apply one mutation.
    ///
    /// Resolves once the store has confirmed or refused the change. The
    /// optimistic effect shows through [`Self::effective_like_view`] and
    /// [`Self::has_pending_comment`] as soon as this is called.
    pub async fn apply(&self, mutation: Mutation) -> SyncResult<()> {
        match mutation {
            Mutation::ToggleLike { activity_id } => self.toggle_like(&activity_id).await,
            Mutation::AddComment { activity_id, text } => {
                self.add_comment(&activity_id, &text).await
            }
            Mutation::Follow { target_id } => self.follow(&target_id).await,
            Mutation::Unfollow { target_id } => self.unfollow(&target_id).await,
        }
    }

    /// Like state of an activity as it should be presented.
    ///
    /// The overlay's desired state wins over the reconciled copy; `None`
    /// means the activity is not in the loaded view.
    pub async fn effective_like_view(&self, activity_id: &str) -> Option<LikeView> {
        let activity = self.reconciler.get(activity_id).await?;
        let overlay = self.lock_overlay();
        let view = overlay
            .likes
            .get(activity_id)
            .map_or_else(|| LikeView::of(&activity, &self.viewer_id), |entry| entry.desired);
        Some(view)
    }

    /// Whether a comment submission for `activity_id` is still in flight.
    #[must_use]
    pub fn has_pending_comment(&self, activity_id: &str) -> bool {
        self.lock_overlay()
            .pending_comments
            .get(activity_id)
            .copied()
            .unwrap_or(0)
            > 0
    }

    /// Fold a reconciled activity over the overlay.
    ///
    /// Once the store-confirmed copy agrees with the desired state and no
    /// toggle is outstanding, the overlay entry is dropped and the
    /// reconciled view becomes the single source again.
    pub fn observe_reconciled(&self, activity: &Activity) {
        let mut overlay = self.lock_overlay();
        let Some(entry) = overlay.likes.get(activity.id.as_str()).copied() else {
            return;
        };
        if entry.is_settled() && activity.is_liked_by(&self.viewer_id) == entry.desired.liked {
            overlay.likes.remove(activity.id.as_str());
        }
    }

    /// Drop overlay state for an activity that left the window.
    pub fn discard_overlay(&self, activity_id: &str) {
        let mut overlay = self.lock_overlay();
        overlay.likes.remove(activity_id);
        overlay.pending_comments.remove(activity_id);
    }

    async fn toggle_like(&self, activity_id: &str) -> SyncResult<()> {
        let Some(activity) = self.reconciler.get(activity_id).await else {
            return Err(SyncError::StaleEntity(format!(
                "activity {activity_id} is not in the loaded view"
            )));
        };
        if activity.author_id == self.viewer_id {
            return Err(SyncError::SelfLike(activity_id.to_string()));
        }

        {
            let mut overlay = self.lock_overlay();
            let entry = overlay
                .likes
                .entry(activity_id.to_string())
                .or_insert_with(|| LikeOverlay::anchored(LikeView::of(&activity, &self.viewer_id)));
            *entry = entry.toggle();
        }

        let this = self.clone();
        let id = activity_id.to_string();
        let receiver = self.queue.submit(
            MutationKey {
                target: activity_id.to_string(),
                kind: MutationKind::Like,
            },
            async move { this.drain_like(&id).await },
        );
        receiver.await.map_err(|_| job_dropped())?
    }

    /// Runs at this activity's turn in the like lane.
    ///
    /// Taps that cancelled out while queued drain as no-ops without a
    /// remote call.
    async fn drain_like(&self, activity_id: &str) -> SyncResult<()> {
        let settled = {
            let overlay = self.lock_overlay();
            overlay
                .likes
                .get(activity_id)
                .is_none_or(|entry| entry.is_settled())
        };
        if settled {
            return Ok(());
        }

        let result = self
            .store
            .mutate(MutateCommand::ToggleLike {
                activity_id: activity_id.to_string(),
                profile_id: self.viewer_id.clone(),
            })
            .await
            .and_then(StoreEntity::into_activity);

        let mut overlay = self.lock_overlay();
        match result {
            Ok(authoritative) => {
                if let Some(entry) = overlay.likes.get_mut(activity_id) {
                    *entry = entry.settle_success(LikeView::of(&authoritative, &self.viewer_id));
                }
                Ok(())
            }
            Err(err) => {
                if let Some(entry) = overlay.likes.get_mut(activity_id) {
                    *entry = entry.settle_failure();
                }
                tracing::warn!(
                    error = %err,
                    activity_id = %activity_id,
                    "Like toggle failed, rolled back"
                );
                Err(err)
            }
        }
    }

    async fn add_comment(&self, activity_id: &str, text: &str) -> SyncResult<()> {
        let draft = CommentDraft::new(text);
        draft.validate()?;
        if self.reconciler.get(activity_id).await.is_none() {
            return Err(SyncError::StaleEntity(format!(
                "activity {activity_id} is not in the loaded view"
            )));
        }

        {
            let mut overlay = self.lock_overlay();
            *overlay
                .pending_comments
                .entry(activity_id.to_string())
                .or_insert(0) += 1;
        }

        let this = self.clone();
        let id = activity_id.to_string();
        let receiver = self.queue.submit(
            MutationKey {
                target: activity_id.to_string(),
                kind: MutationKind::Comment,
            },
            async move { this.drain_comment(&id, draft.text).await },
        );
        receiver.await.map_err(|_| job_dropped())?
    }

    async fn drain_comment(&self, activity_id: &str, text: String) -> SyncResult<()> {
        let result = self
            .store
            .mutate(MutateCommand::AddComment {
                activity_id: activity_id.to_string(),
                author_id: self.viewer_id.clone(),
                text,
            })
            .await
            .map(|_| ());

        {
            let mut overlay = self.lock_overlay();
            let remaining = overlay.pending_comments.get_mut(activity_id).map(|count| {
                *count = count.saturating_sub(1);
                *count
            });
            if remaining == Some(0) {
                overlay.pending_comments.remove(activity_id);
            }
        }

        if let Err(ref err) = result {
            tracing::warn!(
                error = %err,
                activity_id = %activity_id,
                "Comment append failed, pending marker dropped"
            );
        }
        result
    }

    async fn follow(&self, target_id: &str) -> SyncResult<()> {
        let graph = self.follow_graph.clone();
        let target = target_id.to_string();
        let receiver = self.queue.submit(
            MutationKey {
                target: target_id.to_string(),
                kind: MutationKind::Follow,
            },
            async move { graph.request_follow(&target).await.map(|_| ()) },
        );
        receiver.await.map_err(|_| job_dropped())?
    }

    async fn unfollow(&self, target_id: &str) -> SyncResult<()> {
        let graph = self.follow_graph.clone();
        let target = target_id.to_string();
        let receiver = self.queue.submit(
            MutationKey {
                target: target_id.to_string(),
                kind: MutationKind::Follow,
            },
            async move { graph.unfollow(&target).await },
        );
        receiver.await.map_err(|_| job_dropped())?
    }

    fn lock_overlay(&self) -> MutexGuard<'_, OverlayState> {
        self.overlay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn job_dropped() -> SyncError {
    SyncError::Internal("mutation job stopped before reporting".to_string())
}
