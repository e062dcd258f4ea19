//! Feed reconciliation.
//!
//! Maintains the materialized activity window for one feed scope and keeps
//! it consistent with the authoritative store. Change events are treated as
//! hints: every splice re-fetches the named entity and folds the
//! authoritative copy into the window, so duplicated or delayed events
//! converge to the same view.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::select_all;
use tokio::sync::{Mutex, RwLock, broadcast};

use brewlog_common::{SyncError, SyncResult};
use brewlog_store::{
    Activity, ChangeEvent, ChangeKind, Cursor, EntityKind, FeedScope, RemoteStoreService,
    Subscription, Visibility,
};

use crate::keyed::KeyedQueue;
use crate::retry::RetryPolicy;

/// Capacity of the view-update broadcast channel.
const UPDATE_CAPACITY: usize = 256;

/// How a splice changed the materialized window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    /// A new activity entered the window.
    Inserted(String),
    /// An activity already in the window was replaced in place.
    Replaced(String),
    /// An activity left the window.
    Removed(String),
}

/// Pagination state of the window.
#[derive(Debug, Default)]
struct Paging {
    cursor: Option<Cursor>,
    /// Set once a fetched page came back short: the window covers the full
    /// history of the scope, so older events may be appended at the tail.
    exhausted: bool,
}

/// Keeps one feed scope's activity window synchronized with the store.
///
/// The window is ordered by (`created_at`, id) descending. Splices for the
/// same activity are serialized through a keyed queue so events about one
/// entity apply in arrival order; splices for different activities run
/// concurrently.
#[derive(Clone)]
pub struct FeedReconciler {
    store: RemoteStoreService,
    scope: FeedScope,
    page_size: usize,
    retry: RetryPolicy,
    view: Arc<RwLock<Vec<Activity>>>,
    paging: Arc<Mutex<Paging>>,
    splices: KeyedQueue<String>,
    updates: broadcast::Sender<ViewUpdate>,
}

impl FeedReconciler {
    /// Create a reconciler for `scope` with an empty window.
    #[must_use]
    pub fn new(
        store: RemoteStoreService,
        scope: FeedScope,
        page_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            store,
            scope,
            page_size: page_size.max(1),
            retry,
            view: Arc::new(RwLock::new(Vec::new())),
            paging: Arc::new(Mutex::new(Paging::default())),
            splices: KeyedQueue::new(),
            updates,
        }
    }

    /// The scope this reconciler materializes.
    #[must_use]
    pub const fn scope(&self) -> &FeedScope {
        &self.scope
    }

    /// Subscribe to window changes caused by event splices.
    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<ViewUpdate> {
        self.updates.subscribe()
    }

    /// Number of activities with a splice still in flight.
    #[must_use]
    pub fn pending_splices(&self) -> usize {
        self.splices.active_keys()
    }

    /// Replace the window with the first page of the scope.
    pub async fn load_initial(&self) -> SyncResult<Vec<Activity>> {
        let mut paging = self.paging.lock().await;
        let page = self.fetch_page_retrying(None).await?;

        paging.cursor = page.last().map(Cursor::of);
        paging.exhausted = page.len() < self.page_size;

        let mut view = self.view.write().await;
        view.clone_from(&page);
        Ok(page)
    }

    /// Append the next page to the window.
    ///
    /// Returns the newly appended activities; an empty result means the
    /// scope's history is fully loaded.
    pub async fn load_more(&self) -> SyncResult<Vec<Activity>> {
        let mut paging = self.paging.lock().await;
        if paging.exhausted {
            return Ok(Vec::new());
        }

        let page = self.fetch_page_retrying(paging.cursor.clone()).await?;
        if let Some(last) = page.last() {
            paging.cursor = Some(Cursor::of(last));
        }
        paging.exhausted = page.len() < self.page_size;

        let mut view = self.view.write().await;
        // An event splice may have inserted part of this page already.
        let appended: Vec<Activity> = page
            .into_iter()
            .filter(|activity| !view.iter().any(|existing| existing.id == activity.id))
            .collect();
        view.extend(appended.iter().cloned());
        Ok(appended)
    }

    /// Current window contents, newest first.
    pub async fn snapshot(&self) -> Vec<Activity> {
        self.view.read().await.clone()
    }

    /// Look up one activity in the window.
    pub async fn get(&self, id: &str) -> Option<Activity> {
        self.view
            .read()
            .await
            .iter()
            .find(|activity| activity.id == id)
            .cloned()
    }

    /// Consume change streams until every sender is dropped.
    pub async fn run(self, subscriptions: Vec<Subscription>) {
        let mut events = select_all(subscriptions.into_iter().map(Subscription::into_stream));
        while let Some(event) = events.next().await {
            self.handle_event(event);
        }
        tracing::debug!(scope = ?self.scope, "Change streams closed, reconciler stopping");
    }

    /// Dispatch one change hint.
    ///
    /// Splicing happens on background jobs; this only routes the event onto
    /// the right per-activity chain so a slow re-fetch never stalls events
    /// for other entities.
    pub fn handle_event(&self, event: ChangeEvent) {
        match event.entity_kind {
            EntityKind::Activity => {
                let this = self.clone();
                let id = event.entity_id.clone();
                drop(self.splices.submit(event.entity_id, async move {
                    this.splice_activity(&id, event.change).await;
                }));
            }
            EntityKind::Comment => match event.change {
                ChangeKind::Created | ChangeKind::Updated => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.splice_for_comment(&event.entity_id).await;
                    });
                }
                // Comments are append-only; nothing to fold back.
                ChangeKind::Deleted => {}
            },
            _ => {
                tracing::debug!(kind = ?event.entity_kind, "Ignoring event outside feed scope");
            }
        }
    }

    /// Re-fetch an activity named by an event and fold it into the window.
    async fn splice_activity(&self, id: &str, change: ChangeKind) {
        match change {
            ChangeKind::Created | ChangeKind::Updated => {
                let Some(activity) = self.fetch_activity_optional(id).await else {
                    return;
                };
                if change == ChangeKind::Created && !self.activity_in_scope(&activity).await {
                    tracing::debug!(activity_id = %id, "Activity outside scope, not spliced");
                    return;
                }
                self.splice_fetched(activity, change).await;
            }
            // Deletions carry enough information on their own.
            ChangeKind::Deleted => self.remove_from_view(id).await,
        }
    }

    /// Resolve a comment event to its parent activity and re-splice it.
    ///
    /// The re-fetch is keyed under the parent id, so a comment splice and a
    /// like splice for the same activity never interleave.
    async fn splice_for_comment(&self, comment_id: &str) {
        let comment = match self
            .retry
            .run("fetch comment", || {
                let store = self.store.clone();
                let id = comment_id.to_string();
                async move { store.fetch_comment(&id).await }
            })
            .await
        {
            Ok(comment) => comment,
            Err(SyncError::NotFound(_)) => {
                tracing::debug!(comment_id = %comment_id, "Comment gone before re-fetch");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, comment_id = %comment_id, "Comment re-fetch failed");
                return;
            }
        };

        let this = self.clone();
        let parent_id = comment.activity_id;
        let key = parent_id.clone();
        drop(self.splices.submit(key, async move {
            match this.fetch_activity_optional(&parent_id).await {
                // The parent vanished between the events; its own deletion
                // event performs the removal.
                None => {}
                Some(activity) => this.splice_fetched(activity, ChangeKind::Updated).await,
            }
        }));
    }

    /// Fold an authoritative activity copy into the window.
    async fn splice_fetched(&self, activity: Activity, change: ChangeKind) {
        let paging = self.paging.lock().await;
        let mut view = self.view.write().await;

        if let Some(position) = view.iter().position(|existing| existing.id == activity.id) {
            let id = activity.id.clone();
            view[position] = activity;
            let _ = self.updates.send(ViewUpdate::Replaced(id));
            return;
        }

        // Updates for activities outside the window stay outside; only
        // creations may grow the window.
        if change != ChangeKind::Created {
            return;
        }

        let position = view.partition_point(|existing| {
            (existing.created_at, existing.id.as_str())
                > (activity.created_at, activity.id.as_str())
        });
        if position == view.len() && !view.is_empty() && !paging.exhausted {
            // Belongs to a page that was never loaded.
            tracing::debug!(activity_id = %activity.id, "Activity older than loaded window, not spliced");
            return;
        }

        let id = activity.id.clone();
        view.insert(position, activity);
        let _ = self.updates.send(ViewUpdate::Inserted(id));
    }

    async fn remove_from_view(&self, id: &str) {
        // Ordered behind in-flight page loads: a removal applied against the
        // pre-load window would be undone when the fetched page lands.
        let _paging = self.paging.lock().await;
        let mut view = self.view.write().await;
        if let Some(position) = view.iter().position(|existing| existing.id == id) {
            view.remove(position);
            let _ = self.updates.send(ViewUpdate::Removed(id.to_string()));
        }
    }

    /// Whether a newly created activity belongs to this scope.
    async fn activity_in_scope(&self, activity: &Activity) -> bool {
        match &self.scope {
            FeedScope::Following { viewer_id } => {
                activity.author_id == *viewer_id
                    || self.follows(viewer_id, &activity.author_id).await
            }
            FeedScope::Profile {
                viewer_id,
                profile_id,
            } => {
                if activity.author_id != *profile_id {
                    return false;
                }
                if activity.author_id == *viewer_id {
                    return true;
                }
                match activity.visibility {
                    Visibility::Public => true,
                    Visibility::Private => self.follows(viewer_id, &activity.author_id).await,
                }
            }
        }
    }

    async fn follows(&self, follower_id: &str, followee_id: &str) -> bool {
        let result = self
            .retry
            .run("check follow edge", || {
                let store = self.store.clone();
                let follower = follower_id.to_string();
                let followee = followee_id.to_string();
                async move { store.follow_edge_between(&follower, &followee).await }
            })
            .await;
        match result {
            Ok(edge) => edge.is_some(),
            Err(err) => {
                tracing::warn!(error = %err, "Follow edge check failed, treating as out of scope");
                false
            }
        }
    }

    /// Re-fetch an activity, retrying transient failures.
    ///
    /// `None` means the window must not change: the entity is gone (its
    /// deletion event does the removal) or the store stayed unreachable and
    /// the stale entry is kept.
    async fn fetch_activity_optional(&self, id: &str) -> Option<Activity> {
        let result = self
            .retry
            .run("re-fetch activity", || {
                let store = self.store.clone();
                let id = id.to_string();
                async move { store.fetch_activity(&id).await }
            })
            .await;
        match result {
            Ok(activity) => Some(activity),
            Err(SyncError::NotFound(_)) => {
                tracing::debug!(activity_id = %id, "Activity gone before re-fetch");
                None
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    activity_id = %id,
                    "Re-fetch failed, leaving last known state"
                );
                None
            }
        }
    }

    async fn fetch_page_retrying(&self, cursor: Option<Cursor>) -> SyncResult<Vec<Activity>> {
        self.retry
            .run("fetch feed page", || {
                let store = self.store.clone();
                let scope = self.scope.clone();
                let cursor = cursor.clone();
                let limit = self.page_size;
                async move { store.fetch_page(&scope, cursor.as_ref(), limit).await }
            })
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use brewlog_store::test_utils::{FlakyStore, GatedStore, seed_private, seed_public};
    use brewlog_store::{ActivityDraft, MemoryStore, MutateCommand, Profile, RemoteStore};
    use chrono::Utc;

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        alice: Profile,
        bob: Profile,
        carol: Profile,
    }

    /// Store with `alice` following `bob`, plus a stranger `carol`.
    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alice = seed_public(&store, "alice");
        let bob = seed_public(&store, "bob");
        let carol = seed_public(&store, "carol");
        store
            .mutate(MutateCommand::CreateFollowEdge {
                follower_id: alice.id.clone(),
                followee_id: bob.id.clone(),
            })
            .await
            .unwrap();
        Fixture {
            store,
            alice,
            bob,
            carol,
        }
    }

    fn draft(coffee: &str) -> ActivityDraft {
        ActivityDraft {
            method: "v60".to_string(),
            coffee_name: coffee.to_string(),
            dose_grams: 18,
            water_grams: 300,
            notes: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn following_reconciler(fx: &Fixture, page_size: usize) -> FeedReconciler {
        FeedReconciler::new(
            fx.store.clone(),
            FeedScope::Following {
                viewer_id: fx.alice.id.clone(),
            },
            page_size,
            fast_retry(),
        )
    }

    fn profile_reconciler(fx: &Fixture, viewer: &Profile, profile: &Profile) -> FeedReconciler {
        FeedReconciler::new(
            fx.store.clone(),
            FeedScope::Profile {
                viewer_id: viewer.id.clone(),
                profile_id: profile.id.clone(),
            },
            30,
            fast_retry(),
        )
    }

    async fn wait_until<F>(what: &str, mut done: F)
    where
        F: AsyncFnMut() -> bool,
    {
        for _ in 0..200 {
            if done().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_load_initial_fills_window_newest_first() {
        let fx = fixture().await;
        let base = Utc::now();
        let old = fx
            .store
            .add_activity_at(&fx.bob.id, &draft("ethiopia"), base)
            .unwrap();
        let new = fx
            .store
            .add_activity_at(
                &fx.bob.id,
                &draft("kenya"),
                base + chrono::Duration::minutes(1),
            )
            .unwrap();

        let reconciler = following_reconciler(&fx, 30);
        let page = reconciler.load_initial().await.unwrap();

        let ids: Vec<&str> = page.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![new.id.as_str(), old.id.as_str()]);
    }

    #[tokio::test]
    async fn test_load_more_appends_and_exhausts() {
        let fx = fixture().await;
        let base = Utc::now();
        for i in 0..5 {
            fx.store
                .add_activity_at(
                    &fx.bob.id,
                    &draft(&format!("brew-{i}")),
                    base - chrono::Duration::minutes(i64::from(i)),
                )
                .unwrap();
        }

        let reconciler = following_reconciler(&fx, 2);
        assert_eq!(reconciler.load_initial().await.unwrap().len(), 2);
        assert_eq!(reconciler.load_more().await.unwrap().len(), 2);
        assert_eq!(reconciler.load_more().await.unwrap().len(), 1);
        // Exhausted: further calls are no-ops.
        assert!(reconciler.load_more().await.unwrap().is_empty());
        assert_eq!(reconciler.snapshot().await.len(), 5);
    }

    #[tokio::test]
    async fn test_created_event_splices_at_head() {
        let fx = fixture().await;
        fx.store
            .add_activity(&fx.bob.id, &draft("ethiopia"))
            .unwrap();

        let reconciler = following_reconciler(&fx, 30);
        reconciler.load_initial().await.unwrap();

        let fresh = fx.store.add_activity(&fx.bob.id, &draft("kenya")).unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            fresh.id.clone(),
            ChangeKind::Created,
        ));

        wait_until("head insert", async || {
            reconciler.snapshot().await.first().map(|a| a.id.clone()) == Some(fresh.id.clone())
        })
        .await;
        assert_eq!(reconciler.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_created_event_out_of_scope_is_ignored() {
        let fx = fixture().await;
        fx.store
            .add_activity(&fx.bob.id, &draft("ethiopia"))
            .unwrap();

        let reconciler = following_reconciler(&fx, 30);
        reconciler.load_initial().await.unwrap();

        // Alice does not follow carol.
        let foreign = fx
            .store
            .add_activity(&fx.carol.id, &draft("robusta"))
            .unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            foreign.id,
            ChangeKind::Created,
        ));

        wait_until("splice drained", async || {
            reconciler.pending_splices() == 0
        })
        .await;
        assert_eq!(reconciler.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_profile_scope_splices_only_profile_author() {
        let fx = fixture().await;
        fx.store
            .add_activity(&fx.bob.id, &draft("ethiopia"))
            .unwrap();

        let reconciler = profile_reconciler(&fx, &fx.alice, &fx.bob);
        assert_eq!(reconciler.load_initial().await.unwrap().len(), 1);

        // Carol's post carries the wrong author for this scope.
        let foreign = fx
            .store
            .add_activity(&fx.carol.id, &draft("robusta"))
            .unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            foreign.id.clone(),
            ChangeKind::Created,
        ));
        let fresh = fx.store.add_activity(&fx.bob.id, &draft("kenya")).unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            fresh.id.clone(),
            ChangeKind::Created,
        ));

        wait_until("splices drained", async || {
            reconciler.pending_splices() == 0
        })
        .await;
        let snapshot = reconciler.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, fresh.id);
        assert!(snapshot.iter().all(|a| a.id != foreign.id));
    }

    #[tokio::test]
    async fn test_profile_scope_private_author_needs_follow_edge() {
        let fx = fixture().await;
        let dana = seed_private(&fx.store, "dana");

        // Carol does not follow dana.
        let reconciler = profile_reconciler(&fx, &fx.carol, &dana);
        reconciler.load_initial().await.unwrap();

        let hidden = fx.store.add_activity(&dana.id, &draft("geisha")).unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            hidden.id,
            ChangeKind::Created,
        ));
        wait_until("splice drained", async || {
            reconciler.pending_splices() == 0
        })
        .await;
        assert!(reconciler.snapshot().await.is_empty());

        // With an edge in place the next post is admitted.
        fx.store.add_follow_edge(&fx.carol.id, &dana.id);
        let visible = fx.store.add_activity(&dana.id, &draft("bourbon")).unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            visible.id.clone(),
            ChangeKind::Created,
        ));

        wait_until("private splice", async || {
            reconciler.snapshot().await.first().map(|a| a.id.clone()) == Some(visible.id.clone())
        })
        .await;
        assert_eq!(reconciler.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_event_older_than_window_is_not_spliced() {
        let fx = fixture().await;
        let base = Utc::now();
        for i in 0..3 {
            fx.store
                .add_activity_at(
                    &fx.bob.id,
                    &draft(&format!("brew-{i}")),
                    base - chrono::Duration::minutes(i64::from(i)),
                )
                .unwrap();
        }

        // Window holds only the 2 newest; history is not exhausted.
        let reconciler = following_reconciler(&fx, 2);
        reconciler.load_initial().await.unwrap();

        let ancient = fx
            .store
            .add_activity_at(
                &fx.bob.id,
                &draft("archive"),
                base - chrono::Duration::hours(2),
            )
            .unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            ancient.id.clone(),
            ChangeKind::Created,
        ));

        wait_until("splice drained", async || {
            reconciler.pending_splices() == 0
        })
        .await;
        let snapshot = reconciler.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|a| a.id != ancient.id));
    }

    #[tokio::test]
    async fn test_event_older_than_window_appends_when_exhausted() {
        let fx = fixture().await;
        fx.store
            .add_activity(&fx.bob.id, &draft("ethiopia"))
            .unwrap();

        let reconciler = following_reconciler(&fx, 30);
        reconciler.load_initial().await.unwrap();

        let older = fx
            .store
            .add_activity_at(
                &fx.bob.id,
                &draft("archive"),
                Utc::now() - chrono::Duration::hours(2),
            )
            .unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            older.id.clone(),
            ChangeKind::Created,
        ));

        wait_until("tail append", async || {
            reconciler.snapshot().await.last().map(|a| a.id.clone()) == Some(older.id.clone())
        })
        .await;
    }

    #[tokio::test]
    async fn test_updated_event_replaces_in_place() {
        let fx = fixture().await;
        let base = Utc::now();
        let first = fx
            .store
            .add_activity_at(&fx.bob.id, &draft("ethiopia"), base)
            .unwrap();
        fx.store
            .add_activity_at(
                &fx.bob.id,
                &draft("kenya"),
                base + chrono::Duration::minutes(1),
            )
            .unwrap();

        let reconciler = following_reconciler(&fx, 30);
        reconciler.load_initial().await.unwrap();

        let mut edited = draft("yirgacheffe");
        edited.notes = Some("floral".to_string());
        fx.store.update_activity(&first.id, &edited).unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            first.id.clone(),
            ChangeKind::Updated,
        ));

        wait_until("in-place replace", async || {
            reconciler
                .get(&first.id)
                .await
                .is_some_and(|a| a.coffee_name == "yirgacheffe")
        })
        .await;
        // Still the oldest entry: replacement must not reorder.
        let snapshot = reconciler.snapshot().await;
        assert_eq!(snapshot.last().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_deleted_event_removes_without_refetch() {
        let fx = fixture().await;
        let activity = fx
            .store
            .add_activity(&fx.bob.id, &draft("ethiopia"))
            .unwrap();

        let reconciler = following_reconciler(&fx, 30);
        reconciler.load_initial().await.unwrap();

        fx.store.remove_activity(&activity.id).unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            activity.id,
            ChangeKind::Deleted,
        ));

        wait_until("removal", async || reconciler.snapshot().await.is_empty()).await;
    }

    #[tokio::test]
    async fn test_delete_during_parked_load_still_removes() {
        let fx = fixture().await;
        let doomed = fx
            .store
            .add_activity(&fx.bob.id, &draft("ethiopia"))
            .unwrap();

        let gated = Arc::new(GatedStore::new(fx.store.clone()));
        let reconciler = FeedReconciler::new(
            gated.clone(),
            FeedScope::Following {
                viewer_id: fx.alice.id.clone(),
            },
            30,
            fast_retry(),
        );

        // Park load_initial after its store read: the held page still
        // contains the activity about to be deleted.
        let load = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.load_initial().await })
        };
        wait_until("page parked", async || gated.parked_pages() == 1).await;

        fx.store.remove_activity(&doomed.id).unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            doomed.id.clone(),
            ChangeKind::Deleted,
        ));
        // Give the removal time to run up against the in-flight load.
        tokio::time::sleep(Duration::from_millis(20)).await;

        gated.release_page();
        load.await.unwrap().unwrap();

        wait_until("removal after load", async || {
            reconciler.pending_splices() == 0 && reconciler.get(&doomed.id).await.is_none()
        })
        .await;
        assert!(reconciler.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_refetch_exhaustion_leaves_stale_entry() {
        let fx = fixture().await;
        let activity = fx
            .store
            .add_activity(&fx.bob.id, &draft("ethiopia"))
            .unwrap();

        let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
        let reconciler = FeedReconciler::new(
            flaky.clone(),
            FeedScope::Following {
                viewer_id: fx.alice.id.clone(),
            },
            30,
            fast_retry(),
        );
        reconciler.load_initial().await.unwrap();

        fx.store
            .update_activity(&activity.id, &draft("yirgacheffe"))
            .unwrap();
        // More failures than the retry budget: the splice gives up.
        flaky.fail_next_reads(10);
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Activity,
            activity.id.clone(),
            ChangeKind::Updated,
        ));

        wait_until("splice drained", async || {
            reconciler.pending_splices() == 0
        })
        .await;
        let stale = reconciler.get(&activity.id).await.unwrap();
        assert_eq!(stale.coffee_name, "ethiopia");
    }

    #[tokio::test]
    async fn test_comment_event_refreshes_parent() {
        let fx = fixture().await;
        let activity = fx
            .store
            .add_activity(&fx.bob.id, &draft("ethiopia"))
            .unwrap();

        let reconciler = following_reconciler(&fx, 30);
        reconciler.load_initial().await.unwrap();

        let comment = fx
            .store
            .mutate(MutateCommand::AddComment {
                activity_id: activity.id.clone(),
                author_id: fx.alice.id.clone(),
                text: "lovely crema".to_string(),
            })
            .await
            .unwrap()
            .into_comment()
            .unwrap();
        reconciler.handle_event(ChangeEvent::new(
            EntityKind::Comment,
            comment.id,
            ChangeKind::Created,
        ));

        wait_until("comment folded in", async || {
            reconciler
                .get(&activity.id)
                .await
                .is_some_and(|a| a.comments.len() == 1)
        })
        .await;
    }
}
