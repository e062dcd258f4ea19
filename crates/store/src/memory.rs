//! In-memory authoritative store.
//!
//! Reference implementation of [`RemoteStore`] and [`ChangeFeed`] backed by
//! in-process tables. It enforces the server-side rules the sync engine
//! relies on (self-like rejection, a single pending request per pair, like
//! counts matching the membership list), creates notifications as a side
//! effect of mutations, and fans change events out to matching subscribers
//! in mutation order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use validator::Validate;

use brewlog_common::{IdGenerator, SyncError, SyncResult};

use crate::commands::{ActivityDraft, FollowDecision, MutateCommand, StoreEntity};
use crate::entities::{
    Activity, Comment, FollowEdge, FollowRequest, FollowRequestStatus, Notification,
    NotificationKind, Profile, Visibility,
};
use crate::events::{ChangeEvent, ChangeKind, EntityKind, Topic};
use crate::remote::{ChangeFeed, Cursor, FeedScope, RemoteStore, Subscription};

/// In-memory authoritative store for tests and demos.
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    ids: IdGenerator,
    preview_length: usize,
}

#[derive(Default)]
struct StoreState {
    profiles: HashMap<String, Profile>,
    activities: HashMap<String, Activity>,
    comments: HashMap<String, Comment>,
    follow_edges: HashMap<String, FollowEdge>,
    follow_requests: HashMap<String, FollowRequest>,
    notifications: HashMap<String, Notification>,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    token: String,
    topic: Topic,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    const DEFAULT_PREVIEW_LENGTH: usize = 100;

    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_preview_length(Self::DEFAULT_PREVIEW_LENGTH)
    }

    /// Create an empty store with a custom notification preview length.
    #[must_use]
    pub fn with_preview_length(preview_length: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            ids: IdGenerator::new(),
            preview_length,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Seeding and out-of-band actions ===
    //
    // These model actions performed by other clients (or an admin) directly
    // against the backend. The sync engine itself only goes through
    // `RemoteStore` and `ChangeFeed`.

    /// Create a profile.
    pub fn add_profile(&self, username: &str, visibility: Visibility) -> Profile {
        let profile = Profile {
            id: self.ids.generate(),
            username: username.to_string(),
            display_name: None,
            visibility,
            created_at: Utc::now(),
        };

        let mut state = self.lock();
        state.profiles.insert(profile.id.clone(), profile.clone());
        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::Profile, &profile.id, ChangeKind::Created),
            None,
        );
        profile
    }

    /// Create an activity authored by `author_id`, timestamped now.
    pub fn add_activity(&self, author_id: &str, draft: &ActivityDraft) -> SyncResult<Activity> {
        self.add_activity_at(author_id, draft, Utc::now())
    }

    /// Create an activity with an explicit timestamp.
    ///
    /// Deterministic seeding for tests and demos that depend on feed order.
    pub fn add_activity_at(
        &self,
        author_id: &str,
        draft: &ActivityDraft,
        created_at: DateTime<Utc>,
    ) -> SyncResult<Activity> {
        draft.validate()?;

        let mut state = self.lock();
        let author = state
            .profiles
            .get(author_id)
            .ok_or_else(|| SyncError::NotFound(format!("profile {author_id}")))?;

        let activity = Activity {
            id: self.ids.generate(),
            author_id: author_id.to_string(),
            visibility: author.visibility,
            method: draft.method.clone(),
            coffee_name: draft.coffee_name.clone(),
            dose_grams: draft.dose_grams,
            water_grams: draft.water_grams,
            notes: draft.notes.clone(),
            like_count: 0,
            liked_by: Vec::new(),
            comments: Vec::new(),
            created_at,
        };

        state
            .activities
            .insert(activity.id.clone(), activity.clone());
        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::Activity, &activity.id, ChangeKind::Created),
            None,
        );
        Ok(activity)
    }

    /// Replace the content fields of an activity.
    ///
    /// Likes, comments and the original timestamp are untouched.
    pub fn update_activity(&self, id: &str, draft: &ActivityDraft) -> SyncResult<Activity> {
        draft.validate()?;

        let mut state = self.lock();
        let activity = state
            .activities
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(format!("activity {id}")))?;

        activity.method = draft.method.clone();
        activity.coffee_name = draft.coffee_name.clone();
        activity.dose_grams = draft.dose_grams;
        activity.water_grams = draft.water_grams;
        activity.notes = draft.notes.clone();
        let updated = activity.clone();

        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::Activity, id, ChangeKind::Updated),
            None,
        );
        Ok(updated)
    }

    /// Create a follow edge without the guard checks of the mutation path.
    ///
    /// Models an out-of-band write. Pairing this with a pending request
    /// produces the contradictory state the sync engine must detect rather
    /// than repair.
    pub fn add_follow_edge(&self, follower_id: &str, followee_id: &str) -> FollowEdge {
        let edge = FollowEdge {
            id: self.ids.generate(),
            follower_id: follower_id.to_string(),
            followee_id: followee_id.to_string(),
            created_at: Utc::now(),
        };

        let mut state = self.lock();
        state.follow_edges.insert(edge.id.clone(), edge.clone());
        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::FollowEdge, &edge.id, ChangeKind::Created),
            Some(followee_id),
        );
        edge
    }

    /// Delete an activity and its comments.
    pub fn remove_activity(&self, id: &str) -> SyncResult<()> {
        let mut state = self.lock();
        let activity = state
            .activities
            .remove(id)
            .ok_or_else(|| SyncError::NotFound(format!("activity {id}")))?;

        state.comments.retain(|_, c| c.activity_id != activity.id);
        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::Activity, id, ChangeKind::Deleted),
            None,
        );
        Ok(())
    }

    /// Number of live change-feed subscriptions.
    ///
    /// Lets tests verify that every subscribe was paired with a detach.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    // === Mutation arms ===

    fn toggle_like(&self, activity_id: &str, profile_id: &str) -> SyncResult<StoreEntity> {
        let mut state = self.lock();
        if !state.profiles.contains_key(profile_id) {
            return Err(SyncError::NotFound(format!("profile {profile_id}")));
        }

        let activity = state
            .activities
            .get_mut(activity_id)
            .ok_or_else(|| SyncError::NotFound(format!("activity {activity_id}")))?;
        if activity.author_id == profile_id {
            return Err(SyncError::SelfLike(activity_id.to_string()));
        }

        let liked = if let Some(pos) = activity.liked_by.iter().position(|id| id == profile_id) {
            activity.liked_by.remove(pos);
            activity.like_count = activity.like_count.saturating_sub(1);
            false
        } else {
            activity.liked_by.push(profile_id.to_string());
            activity.like_count += 1;
            true
        };
        let updated = activity.clone();

        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::Activity, activity_id, ChangeKind::Updated),
            None,
        );
        if liked {
            push_notification(
                &mut state,
                &self.ids,
                &updated.author_id,
                NotificationKind::Like,
                profile_id,
                Some(activity_id.to_string()),
                None,
            );
        }
        Ok(StoreEntity::Activity(updated))
    }

    fn add_comment(
        &self,
        activity_id: &str,
        author_id: &str,
        text: &str,
    ) -> SyncResult<StoreEntity> {
        if text.trim().is_empty() || text.chars().count() > 1000 {
            return Err(SyncError::Validation(
                "comment text must be 1-1000 characters".to_string(),
            ));
        }

        let mut state = self.lock();
        if !state.profiles.contains_key(author_id) {
            return Err(SyncError::NotFound(format!("profile {author_id}")));
        }

        let comment = Comment {
            id: self.ids.generate(),
            activity_id: activity_id.to_string(),
            author_id: author_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        };

        let activity = state
            .activities
            .get_mut(activity_id)
            .ok_or_else(|| SyncError::NotFound(format!("activity {activity_id}")))?;
        let index = activity.comments.partition_point(|c| {
            (c.created_at, c.id.as_str()) <= (comment.created_at, comment.id.as_str())
        });
        activity.comments.insert(index, comment.clone());
        let recipient = activity.author_id.clone();

        state.comments.insert(comment.id.clone(), comment.clone());
        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::Comment, &comment.id, ChangeKind::Created),
            None,
        );
        push_notification(
            &mut state,
            &self.ids,
            &recipient,
            NotificationKind::Comment,
            author_id,
            Some(activity_id.to_string()),
            Some(truncate_preview(text, self.preview_length)),
        );
        Ok(StoreEntity::Comment(comment))
    }

    fn create_follow_edge(&self, follower_id: &str, followee_id: &str) -> SyncResult<StoreEntity> {
        let mut state = self.lock();
        if follower_id == followee_id {
            return Err(SyncError::Validation("cannot follow yourself".to_string()));
        }
        if !state.profiles.contains_key(follower_id) {
            return Err(SyncError::NotFound(format!("profile {follower_id}")));
        }
        let followee = state
            .profiles
            .get(followee_id)
            .ok_or_else(|| SyncError::NotFound(format!("profile {followee_id}")))?;
        if followee.is_private() {
            return Err(SyncError::IllegalTransition(format!(
                "profile {followee_id} is private, a follow request is required"
            )));
        }
        if find_edge(&state, follower_id, followee_id).is_some() {
            return Err(SyncError::IllegalTransition(format!(
                "already following {followee_id}"
            )));
        }
        if find_pending(&state, follower_id, followee_id).is_some() {
            return Err(SyncError::DuplicateRequest(followee_id.to_string()));
        }

        let edge = FollowEdge {
            id: self.ids.generate(),
            follower_id: follower_id.to_string(),
            followee_id: followee_id.to_string(),
            created_at: Utc::now(),
        };
        state.follow_edges.insert(edge.id.clone(), edge.clone());

        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::FollowEdge, &edge.id, ChangeKind::Created),
            Some(followee_id),
        );
        push_notification(
            &mut state,
            &self.ids,
            followee_id,
            NotificationKind::Follow,
            follower_id,
            None,
            None,
        );
        Ok(StoreEntity::FollowEdge(edge))
    }

    fn delete_follow_edge(&self, follower_id: &str, followee_id: &str) -> SyncResult<StoreEntity> {
        let mut state = self.lock();
        let edge = find_edge(&state, follower_id, followee_id).ok_or_else(|| {
            SyncError::IllegalTransition(format!("not following {followee_id}"))
        })?;

        state.follow_edges.remove(&edge.id);
        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::FollowEdge, &edge.id, ChangeKind::Deleted),
            Some(followee_id),
        );
        Ok(StoreEntity::FollowEdge(edge))
    }

    fn create_follow_request(&self, requester_id: &str, target_id: &str) -> SyncResult<StoreEntity> {
        let mut state = self.lock();
        if requester_id == target_id {
            return Err(SyncError::Validation("cannot follow yourself".to_string()));
        }
        if !state.profiles.contains_key(requester_id) {
            return Err(SyncError::NotFound(format!("profile {requester_id}")));
        }
        let target = state
            .profiles
            .get(target_id)
            .ok_or_else(|| SyncError::NotFound(format!("profile {target_id}")))?;
        if !target.is_private() {
            return Err(SyncError::IllegalTransition(format!(
                "profile {target_id} is public, follow it directly"
            )));
        }
        if find_edge(&state, requester_id, target_id).is_some() {
            return Err(SyncError::IllegalTransition(format!(
                "already following {target_id}"
            )));
        }
        if find_pending(&state, requester_id, target_id).is_some() {
            return Err(SyncError::DuplicateRequest(target_id.to_string()));
        }

        let request = FollowRequest {
            id: self.ids.generate(),
            requester_id: requester_id.to_string(),
            target_id: target_id.to_string(),
            status: FollowRequestStatus::Pending,
            created_at: Utc::now(),
        };
        state
            .follow_requests
            .insert(request.id.clone(), request.clone());

        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::FollowRequest, &request.id, ChangeKind::Created),
            Some(target_id),
        );
        push_notification(
            &mut state,
            &self.ids,
            target_id,
            NotificationKind::FollowRequest,
            requester_id,
            None,
            None,
        );
        Ok(StoreEntity::FollowRequest(request))
    }

    fn respond_follow_request(
        &self,
        request_id: &str,
        decision: FollowDecision,
    ) -> SyncResult<StoreEntity> {
        let mut state = self.lock();
        let request = state
            .follow_requests
            .get_mut(request_id)
            .ok_or_else(|| SyncError::NotFound(format!("follow request {request_id}")))?;
        if !request.is_pending() {
            return Err(SyncError::IllegalTransition(format!(
                "follow request {request_id} is already settled"
            )));
        }

        request.status = match decision {
            FollowDecision::Accepted => FollowRequestStatus::Accepted,
            FollowDecision::Rejected => FollowRequestStatus::Rejected,
        };
        let settled = request.clone();

        emit(
            &mut state,
            &ChangeEvent::new(EntityKind::FollowRequest, request_id, ChangeKind::Updated),
            Some(&settled.target_id),
        );

        if decision == FollowDecision::Accepted {
            let edge = FollowEdge {
                id: self.ids.generate(),
                follower_id: settled.requester_id.clone(),
                followee_id: settled.target_id.clone(),
                created_at: Utc::now(),
            };
            state.follow_edges.insert(edge.id.clone(), edge.clone());
            emit(
                &mut state,
                &ChangeEvent::new(EntityKind::FollowEdge, &edge.id, ChangeKind::Created),
                Some(&settled.target_id),
            );
            push_notification(
                &mut state,
                &self.ids,
                &settled.requester_id,
                NotificationKind::FollowAccepted,
                &settled.target_id,
                None,
                None,
            );
        }
        Ok(StoreEntity::FollowRequest(settled))
    }

    fn mark_notification_read(&self, notification_id: &str) -> SyncResult<StoreEntity> {
        let mut state = self.lock();
        let notification = state
            .notifications
            .get_mut(notification_id)
            .ok_or_else(|| SyncError::NotFound(format!("notification {notification_id}")))?;

        let changed = !notification.is_read;
        notification.is_read = true;
        let updated = notification.clone();

        if changed {
            emit(
                &mut state,
                &ChangeEvent::new(
                    EntityKind::Notification,
                    notification_id,
                    ChangeKind::Updated,
                ),
                Some(&updated.recipient_id),
            );
        }
        Ok(StoreEntity::Notification(updated))
    }
}

fn find_edge(state: &StoreState, follower_id: &str, followee_id: &str) -> Option<FollowEdge> {
    state
        .follow_edges
        .values()
        .find(|e| e.follower_id == follower_id && e.followee_id == followee_id)
        .cloned()
}

fn find_pending(state: &StoreState, requester_id: &str, target_id: &str) -> Option<FollowRequest> {
    state
        .follow_requests
        .values()
        .find(|r| r.is_pending() && r.requester_id == requester_id && r.target_id == target_id)
        .cloned()
}

fn visible_to(state: &StoreState, activity: &Activity, viewer_id: &str) -> bool {
    activity.author_id == viewer_id
        || activity.visibility == Visibility::Public
        || find_edge(state, viewer_id, &activity.author_id).is_some()
}

fn in_scope(state: &StoreState, scope: &FeedScope, activity: &Activity) -> bool {
    match scope {
        FeedScope::Following { viewer_id } => {
            activity.author_id == *viewer_id
                || find_edge(state, viewer_id, &activity.author_id).is_some()
        }
        FeedScope::Profile {
            viewer_id,
            profile_id,
        } => activity.author_id == *profile_id && visible_to(state, activity, viewer_id),
    }
}

/// Create a notification unless the action was the recipient's own.
fn push_notification(
    state: &mut StoreState,
    ids: &IdGenerator,
    recipient_id: &str,
    kind: NotificationKind,
    source_profile_id: &str,
    activity_id: Option<String>,
    body: Option<String>,
) {
    if recipient_id == source_profile_id {
        return;
    }
    let notification = Notification {
        id: ids.generate(),
        recipient_id: recipient_id.to_string(),
        kind,
        source_profile_id: source_profile_id.to_string(),
        activity_id,
        body,
        is_read: false,
        created_at: Utc::now(),
    };
    state
        .notifications
        .insert(notification.id.clone(), notification.clone());
    emit(
        state,
        &ChangeEvent::new(EntityKind::Notification, &notification.id, ChangeKind::Created),
        Some(recipient_id),
    );
}

/// Deliver an event to every subscriber whose topic matches, pruning
/// subscribers whose receiving side is gone.
fn emit(state: &mut StoreState, event: &ChangeEvent, recipient: Option<&str>) {
    state.subscribers.retain(|sub| {
        if !sub.topic.matches(event.entity_kind, recipient) {
            return true;
        }
        sub.sender.send(event.clone()).is_ok()
    });
}

fn truncate_preview(text: &str, length: usize) -> String {
    text.chars().take(length).collect()
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch_activity(&self, id: &str) -> SyncResult<Activity> {
        self.lock()
            .activities
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("activity {id}")))
    }

    async fn fetch_page(
        &self,
        scope: &FeedScope,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> SyncResult<Vec<Activity>> {
        let state = self.lock();
        let mut items: Vec<Activity> = state
            .activities
            .values()
            .filter(|a| in_scope(&state, scope, a))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(cursor) = cursor {
            items.retain(|a| {
                a.created_at < cursor.created_at
                    || (a.created_at == cursor.created_at && a.id < cursor.id)
            });
        }
        items.truncate(limit);
        Ok(items)
    }

    async fn fetch_comment(&self, id: &str) -> SyncResult<Comment> {
        self.lock()
            .comments
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("comment {id}")))
    }

    async fn fetch_profile(&self, id: &str) -> SyncResult<Profile> {
        self.lock()
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("profile {id}")))
    }

    async fn fetch_notification(&self, id: &str) -> SyncResult<Notification> {
        self.lock()
            .notifications
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("notification {id}")))
    }

    async fn fetch_notifications(&self, recipient_id: &str) -> SyncResult<Vec<Notification>> {
        let state = self.lock();
        let mut items: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(items)
    }

    async fn fetch_follow_edge(&self, id: &str) -> SyncResult<FollowEdge> {
        self.lock()
            .follow_edges
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("follow edge {id}")))
    }

    async fn follow_edge_between(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> SyncResult<Option<FollowEdge>> {
        Ok(find_edge(&self.lock(), follower_id, followee_id))
    }

    async fn fetch_followees(&self, follower_id: &str) -> SyncResult<Vec<FollowEdge>> {
        let state = self.lock();
        Ok(state
            .follow_edges
            .values()
            .filter(|e| e.follower_id == follower_id)
            .cloned()
            .collect())
    }

    async fn fetch_follow_request(&self, id: &str) -> SyncResult<FollowRequest> {
        self.lock()
            .follow_requests
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("follow request {id}")))
    }

    async fn pending_request_between(
        &self,
        requester_id: &str,
        target_id: &str,
    ) -> SyncResult<Option<FollowRequest>> {
        Ok(find_pending(&self.lock(), requester_id, target_id))
    }

    async fn fetch_received_requests(&self, target_id: &str) -> SyncResult<Vec<FollowRequest>> {
        let state = self.lock();
        let mut items: Vec<FollowRequest> = state
            .follow_requests
            .values()
            .filter(|r| r.is_pending() && r.target_id == target_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn fetch_sent_requests(&self, requester_id: &str) -> SyncResult<Vec<FollowRequest>> {
        let state = self.lock();
        let mut items: Vec<FollowRequest> = state
            .follow_requests
            .values()
            .filter(|r| r.is_pending() && r.requester_id == requester_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn mutate(&self, command: MutateCommand) -> SyncResult<StoreEntity> {
        match command {
            MutateCommand::ToggleLike {
                activity_id,
                profile_id,
            } => self.toggle_like(&activity_id, &profile_id),
            MutateCommand::AddComment {
                activity_id,
                author_id,
                text,
            } => self.add_comment(&activity_id, &author_id, &text),
            MutateCommand::CreateFollowEdge {
                follower_id,
                followee_id,
            } => self.create_follow_edge(&follower_id, &followee_id),
            MutateCommand::DeleteFollowEdge {
                follower_id,
                followee_id,
            } => self.delete_follow_edge(&follower_id, &followee_id),
            MutateCommand::CreateFollowRequest {
                requester_id,
                target_id,
            } => self.create_follow_request(&requester_id, &target_id),
            MutateCommand::RespondFollowRequest {
                request_id,
                decision,
            } => self.respond_follow_request(&request_id, decision),
            MutateCommand::MarkNotificationRead { notification_id } => {
                self.mark_notification_read(&notification_id)
            }
        }
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self, topic: Topic) -> SyncResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = self.ids.generate_token();

        let mut state = self.lock();
        state.subscribers.push(Subscriber {
            token: token.clone(),
            topic,
            sender,
        });
        drop(state);

        tracing::debug!(token = %token, "Change feed subscription opened");

        let registry = Arc::clone(&self.state);
        let detach_token = token.clone();
        Ok(Subscription::new(token, receiver, move || {
            let mut state = registry.lock().unwrap_or_else(PoisonError::into_inner);
            state.subscribers.retain(|sub| sub.token != detach_token);
        }))
    }

    async fn unsubscribe(&self, token: &str) -> SyncResult<()> {
        let mut state = self.lock();
        state.subscribers.retain(|sub| sub.token != token);
        drop(state);
        tracing::debug!(token = %token, "Change feed subscription closed");
        Ok(())
    }
}
