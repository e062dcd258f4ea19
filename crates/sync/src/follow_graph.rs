//! Follow-relationship state machine.
//!
//! Tracks the viewer's outgoing relations as a typed state machine driven
//! from both ends: optimistic transitions at mutation time, authoritative
//! transitions folded back from change events. Contradictory store answers
//! are surfaced as integrity errors, never guessed away.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::stream::select_all;

use brewlog_common::{SyncError, SyncResult};
use brewlog_store::{
    ChangeEvent, ChangeKind, EntityKind, FollowDecision, FollowEdge, FollowRequest,
    FollowRequestStatus, MutateCommand, RemoteStoreService, StoreEntity, Subscription,
};

use crate::retry::RetryPolicy;

/// The viewer's relation to one target profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowState {
    /// No edge and no pending request.
    #[default]
    None,
    /// A follow request awaits the target's decision.
    Pending,
    /// A follow edge exists.
    Following,
}

#[derive(Debug, Default)]
struct GraphState {
    /// Target id to relation; absent means [`FollowState::None`].
    relations: HashMap<String, FollowState>,
    /// Edge id to (follower, followee) for edges seen on the feed.
    edge_pairs: HashMap<String, (String, String)>,
    /// Request id to (requester, target).
    request_pairs: HashMap<String, (String, String)>,
    /// Targets for which the store reported both an edge and a pending
    /// request.
    poisoned: HashSet<String>,
}

fn write_relation(state: &mut GraphState, target_id: &str, relation: FollowState) {
    if relation == FollowState::None {
        state.relations.remove(target_id);
    } else {
        state.relations.insert(target_id.to_string(), relation);
    }
}

/// Caches and mutates the viewer's follow relations.
#[derive(Clone)]
pub struct FollowGraph {
    store: RemoteStoreService,
    viewer_id: String,
    retry: RetryPolicy,
    state: Arc<Mutex<GraphState>>,
}

impl FollowGraph {
    /// Create an empty graph for `viewer_id`.
    #[must_use]
    pub fn new(store: RemoteStoreService, viewer_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            viewer_id: viewer_id.into(),
            retry,
            state: Arc::new(Mutex::new(GraphState::default())),
        }
    }

    /// The viewer's relation to `target_id`.
    pub fn state_of(&self, target_id: &str) -> SyncResult<FollowState> {
        let state = self.lock();
        if state.poisoned.contains(target_id) {
            return Err(SyncError::DataIntegrity(format!(
                "profile {target_id} has both a follow edge and a pending request"
            )));
        }
        Ok(state.relations.get(target_id).copied().unwrap_or_default())
    }

    /// Snapshot of all known relations.
    #[must_use]
    pub fn relations(&self) -> HashMap<String, FollowState> {
        self.lock().relations.clone()
    }

    /// Rebuild the relation cache from the store.
    pub async fn load(&self) -> SyncResult<()> {
        let edges = self
            .retry
            .run("load followees", || {
                let store = self.store.clone();
                let viewer = self.viewer_id.clone();
                async move { store.fetch_followees(&viewer).await }
            })
            .await?;
        let requests = self
            .retry
            .run("load sent follow requests", || {
                let store = self.store.clone();
                let viewer = self.viewer_id.clone();
                async move { store.fetch_sent_requests(&viewer).await }
            })
            .await?;

        let mut state = self.lock();
        state.relations.clear();
        state.edge_pairs.clear();
        state.request_pairs.clear();
        state.poisoned.clear();

        for edge in edges {
            state
                .relations
                .insert(edge.followee_id.clone(), FollowState::Following);
            state
                .edge_pairs
                .insert(edge.id, (edge.follower_id, edge.followee_id));
        }
        for request in requests {
            state.request_pairs.insert(
                request.id.clone(),
                (request.requester_id.clone(), request.target_id.clone()),
            );
            if state.relations.get(&request.target_id) == Some(&FollowState::Following) {
                tracing::error!(
                    target_id = %request.target_id,
                    "Store reports both a follow edge and a pending request"
                );
                state.poisoned.insert(request.target_id.clone());
            } else {
                write_relation(&mut state, &request.target_id, FollowState::Pending);
            }
        }
        Ok(())
    }

    /// Follow `target_id`, or request to when their profile is private.
    ///
    /// Returns the resulting relation. The transition is applied
    /// optimistically and reverted to the exact prior state if the store
    /// refuses.
    pub async fn request_follow(&self, target_id: &str) -> SyncResult<FollowState> {
        if target_id == self.viewer_id {
            return Err(SyncError::Validation("cannot follow yourself".to_string()));
        }
        match self.state_of(target_id)? {
            FollowState::Following => {
                return Err(SyncError::IllegalTransition(format!(
                    "already following {target_id}"
                )));
            }
            FollowState::Pending => {
                return Err(SyncError::DuplicateRequest(target_id.to_string()));
            }
            FollowState::None => {}
        }

        let target = self
            .retry
            .run("fetch follow target", || {
                let store = self.store.clone();
                let id = target_id.to_string();
                async move { store.fetch_profile(&id).await }
            })
            .await?;

        if target.is_private() {
            let previous = self.set_relation(target_id, FollowState::Pending);
            let result = self
                .store
                .mutate(MutateCommand::CreateFollowRequest {
                    requester_id: self.viewer_id.clone(),
                    target_id: target_id.to_string(),
                })
                .await
                .and_then(StoreEntity::into_follow_request);
            match result {
                Ok(request) => {
                    self.lock().request_pairs.insert(
                        request.id,
                        (request.requester_id, request.target_id),
                    );
                    Ok(FollowState::Pending)
                }
                Err(err) => {
                    self.revert_relation(target_id, previous, &err);
                    Err(err)
                }
            }
        } else {
            let previous = self.set_relation(target_id, FollowState::Following);
            let result = self
                .store
                .mutate(MutateCommand::CreateFollowEdge {
                    follower_id: self.viewer_id.clone(),
                    followee_id: target_id.to_string(),
                })
                .await
                .and_then(StoreEntity::into_follow_edge);
            match result {
                Ok(edge) => {
                    self.lock()
                        .edge_pairs
                        .insert(edge.id, (edge.follower_id, edge.followee_id));
                    Ok(FollowState::Following)
                }
                Err(err) => {
                    self.revert_relation(target_id, previous, &err);
                    Err(err)
                }
            }
        }
    }

    /// Remove the follow edge to `target_id`.
    ///
    /// Legal only from [`FollowState::Following`]; any other state is
    /// rejected without touching the store.
    pub async fn unfollow(&self, target_id: &str) -> SyncResult<()> {
        match self.state_of(target_id)? {
            FollowState::Following => {}
            FollowState::Pending | FollowState::None => {
                return Err(SyncError::IllegalTransition(format!(
                    "not following {target_id}"
                )));
            }
        }

        let previous = self.set_relation(target_id, FollowState::None);
        match self
            .store
            .mutate(MutateCommand::DeleteFollowEdge {
                follower_id: self.viewer_id.clone(),
                followee_id: target_id.to_string(),
            })
            .await
        {
            Ok(_) => {
                let mut state = self.lock();
                state
                    .edge_pairs
                    .retain(|_, pair| !(pair.0 == self.viewer_id && pair.1.as_str() == target_id));
                Ok(())
            }
            Err(err) => {
                self.revert_relation(target_id, previous, &err);
                Err(err)
            }
        }
    }

    /// Decide an incoming follow request targeting the viewer.
    ///
    /// The outgoing relation cache is unaffected; the requester's side
    /// reconciles through the emitted events.
    pub async fn respond(&self, request_id: &str, decision: FollowDecision) -> SyncResult<()> {
        self.store
            .mutate(MutateCommand::RespondFollowRequest {
                request_id: request_id.to_string(),
                decision,
            })
            .await
            .map(|_| ())
    }

    /// Consume change streams until every sender is dropped.
    pub async fn run(self, subscriptions: Vec<Subscription>) {
        let mut events = select_all(subscriptions.into_iter().map(Subscription::into_stream));
        while let Some(event) = events.next().await {
            self.handle_event(event).await;
        }
        tracing::debug!("Change streams closed, follow graph stopping");
    }

    /// Fold one follow-related change hint into the relation cache.
    pub async fn handle_event(&self, event: ChangeEvent) {
        match event.entity_kind {
            EntityKind::FollowEdge => self.reconcile_edge(&event.entity_id, event.change).await,
            EntityKind::FollowRequest => {
                self.reconcile_request(&event.entity_id, event.change).await;
            }
            _ => {}
        }
    }

    async fn reconcile_edge(&self, edge_id: &str, change: ChangeKind) {
        match change {
            ChangeKind::Created | ChangeKind::Updated => {
                let Some(edge) = self.fetch_edge(edge_id).await else {
                    return;
                };
                let mut state = self.lock();
                state.edge_pairs.insert(
                    edge.id.clone(),
                    (edge.follower_id.clone(), edge.followee_id.clone()),
                );
                if edge.follower_id == self.viewer_id {
                    write_relation(&mut state, &edge.followee_id, FollowState::Following);
                }
            }
            ChangeKind::Deleted => {
                let pair = self.lock().edge_pairs.remove(edge_id);
                match pair {
                    Some((follower, followee)) => {
                        if follower == self.viewer_id {
                            let mut state = self.lock();
                            // A fresh re-request may already show Pending;
                            // only an unfollowed Following is demoted.
                            if state.relations.get(&followee) == Some(&FollowState::Following) {
                                state.relations.remove(&followee);
                            }
                        }
                    }
                    None => self.reload_after_unknown_deletion(edge_id).await,
                }
            }
        }
    }

    async fn reconcile_request(&self, request_id: &str, change: ChangeKind) {
        match change {
            ChangeKind::Created | ChangeKind::Updated => {
                let Some(request) = self.fetch_request(request_id).await else {
                    return;
                };
                let mut state = self.lock();
                state.request_pairs.insert(
                    request.id.clone(),
                    (request.requester_id.clone(), request.target_id.clone()),
                );
                if request.requester_id != self.viewer_id {
                    return;
                }
                match request.status {
                    FollowRequestStatus::Pending => {
                        if state.relations.get(&request.target_id)
                            == Some(&FollowState::Following)
                        {
                            tracing::error!(
                                target_id = %request.target_id,
                                "Store reports a pending request while already following"
                            );
                            state.poisoned.insert(request.target_id.clone());
                        } else {
                            write_relation(&mut state, &request.target_id, FollowState::Pending);
                        }
                    }
                    // The edge event carries the same fact; folding it here
                    // keeps the cache right if that event is delayed.
                    FollowRequestStatus::Accepted => {
                        write_relation(&mut state, &request.target_id, FollowState::Following);
                    }
                    FollowRequestStatus::Rejected => {
                        if state.relations.get(&request.target_id) == Some(&FollowState::Pending) {
                            state.relations.remove(&request.target_id);
                        }
                    }
                }
            }
            ChangeKind::Deleted => {
                let mut state = self.lock();
                if let Some((requester, target)) = state.request_pairs.remove(request_id)
                    && requester == self.viewer_id
                    && state.relations.get(&target) == Some(&FollowState::Pending)
                {
                    state.relations.remove(&target);
                }
            }
        }
    }

    async fn reload_after_unknown_deletion(&self, entity_id: &str) {
        tracing::debug!(entity_id = %entity_id, "Deletion of unseen entity, reloading relations");
        if let Err(err) = self.load().await {
            tracing::warn!(error = %err, "Relation reload failed, cache may be stale");
        }
    }

    async fn fetch_edge(&self, id: &str) -> Option<FollowEdge> {
        let result = self
            .retry
            .run("re-fetch follow edge", || {
                let store = self.store.clone();
                let id = id.to_string();
                async move { store.fetch_follow_edge(&id).await }
            })
            .await;
        match result {
            Ok(edge) => Some(edge),
            Err(SyncError::NotFound(_)) => None,
            Err(err) => {
                tracing::warn!(error = %err, edge_id = %id, "Follow edge re-fetch failed");
                None
            }
        }
    }

    async fn fetch_request(&self, id: &str) -> Option<FollowRequest> {
        let result = self
            .retry
            .run("re-fetch follow request", || {
                let store = self.store.clone();
                let id = id.to_string();
                async move { store.fetch_follow_request(&id).await }
            })
            .await;
        match result {
            Ok(request) => Some(request),
            Err(SyncError::NotFound(_)) => None,
            Err(err) => {
                tracing::warn!(error = %err, request_id = %id, "Follow request re-fetch failed");
                None
            }
        }
    }

    fn set_relation(&self, target_id: &str, relation: FollowState) -> FollowState {
        let mut state = self.lock();
        let previous = state.relations.get(target_id).copied().unwrap_or_default();
        write_relation(&mut state, target_id, relation);
        previous
    }

    fn revert_relation(&self, target_id: &str, previous: FollowState, cause: &SyncError) {
        let mut state = self.lock();
        write_relation(&mut state, target_id, previous);
        tracing::warn!(
            error = %cause,
            target_id = %target_id,
            "Follow mutation failed, reverted to previous state"
        );
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
