//! Test utilities for exercising failure and interleaving paths.
//!
//! [`FlakyStore`] wraps a [`RemoteStore`] and fails a scripted number of
//! upcoming calls with `RemoteUnavailable`, which is how the retry and
//! rollback paths of the engine are driven in tests. [`GatedStore`] parks
//! page reads at a controllable gate so tests can order other work against
//! a load that is still in flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use brewlog_common::{SyncError, SyncResult};

use crate::commands::{MutateCommand, StoreEntity};
use crate::entities::{
    Activity, Comment, FollowEdge, FollowRequest, Notification, Profile, Visibility,
};
use crate::memory::MemoryStore;
use crate::remote::{Cursor, FeedScope, RemoteStore, RemoteStoreService};

/// A [`RemoteStore`] wrapper that injects transient failures.
///
/// Change-feed subscriptions are not wrapped; pair this with the underlying
/// [`MemoryStore`] used as the [`ChangeFeed`](crate::remote::ChangeFeed).
pub struct FlakyStore {
    inner: RemoteStoreService,
    fail_reads: Mutex<u32>,
    fail_mutations: Mutex<u32>,
}

impl FlakyStore {
    /// Wrap a store with no failures scheduled.
    #[must_use]
    pub fn new(inner: RemoteStoreService) -> Self {
        Self {
            inner,
            fail_reads: Mutex::new(0),
            fail_mutations: Mutex::new(0),
        }
    }

    /// Fail the next `count` read calls.
    pub fn fail_next_reads(&self, count: u32) {
        *self
            .fail_reads
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = count;
    }

    /// Fail the next `count` mutation calls.
    pub fn fail_next_mutations(&self, count: u32) {
        *self
            .fail_mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = count;
    }

    fn take_failure(counter: &Mutex<u32>, what: &str) -> SyncResult<()> {
        let mut remaining = counter.lock().unwrap_or_else(PoisonError::into_inner);
        if *remaining > 0 {
            *remaining -= 1;
            return Err(SyncError::RemoteUnavailable(format!(
                "injected {what} failure"
            )));
        }
        Ok(())
    }

    fn check_read(&self) -> SyncResult<()> {
        Self::take_failure(&self.fail_reads, "read")
    }

    fn check_mutation(&self) -> SyncResult<()> {
        Self::take_failure(&self.fail_mutations, "mutation")
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn fetch_activity(&self, id: &str) -> SyncResult<Activity> {
        self.check_read()?;
        self.inner.fetch_activity(id).await
    }

    async fn fetch_page(
        &self,
        scope: &FeedScope,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> SyncResult<Vec<Activity>> {
        self.check_read()?;
        self.inner.fetch_page(scope, cursor, limit).await
    }

    async fn fetch_comment(&self, id: &str) -> SyncResult<Comment> {
        self.check_read()?;
        self.inner.fetch_comment(id).await
    }

    async fn fetch_profile(&self, id: &str) -> SyncResult<Profile> {
        self.check_read()?;
        self.inner.fetch_profile(id).await
    }

    async fn fetch_notification(&self, id: &str) -> SyncResult<Notification> {
        self.check_read()?;
        self.inner.fetch_notification(id).await
    }

    async fn fetch_notifications(&self, recipient_id: &str) -> SyncResult<Vec<Notification>> {
        self.check_read()?;
        self.inner.fetch_notifications(recipient_id).await
    }

    async fn fetch_follow_edge(&self, id: &str) -> SyncResult<FollowEdge> {
        self.check_read()?;
        self.inner.fetch_follow_edge(id).await
    }

    async fn follow_edge_between(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> SyncResult<Option<FollowEdge>> {
        self.check_read()?;
        self.inner.follow_edge_between(follower_id, followee_id).await
    }

    async fn fetch_followees(&self, follower_id: &str) -> SyncResult<Vec<FollowEdge>> {
        self.check_read()?;
        self.inner.fetch_followees(follower_id).await
    }

    async fn fetch_follow_request(&self, id: &str) -> SyncResult<FollowRequest> {
        self.check_read()?;
        self.inner.fetch_follow_request(id).await
    }

    async fn pending_request_between(
        &self,
        requester_id: &str,
        target_id: &str,
    ) -> SyncResult<Option<FollowRequest>> {
        self.check_read()?;
        self.inner
            .pending_request_between(requester_id, target_id)
            .await
    }

    async fn fetch_received_requests(&self, target_id: &str) -> SyncResult<Vec<FollowRequest>> {
        self.check_read()?;
        self.inner.fetch_received_requests(target_id).await
    }

    async fn fetch_sent_requests(&self, requester_id: &str) -> SyncResult<Vec<FollowRequest>> {
        self.check_read()?;
        self.inner.fetch_sent_requests(requester_id).await
    }

    async fn mutate(&self, command: MutateCommand) -> SyncResult<StoreEntity> {
        self.check_mutation()?;
        self.inner.mutate(command).await
    }
}

/// A [`RemoteStore`] wrapper that parks `fetch_page` replies until released.
///
/// The inner read completes before the gate, so a parked page is a snapshot
/// of the store from before whatever the test does while the load is held.
/// Every other call passes straight through.
pub struct GatedStore {
    inner: RemoteStoreService,
    gate: Semaphore,
    parked: AtomicUsize,
}

impl GatedStore {
    /// Wrap a store with the gate closed.
    #[must_use]
    pub fn new(inner: RemoteStoreService) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    /// Number of `fetch_page` calls currently held at the gate.
    #[must_use]
    pub fn parked_pages(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    /// Let one parked (or future) `fetch_page` call through.
    pub fn release_page(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl RemoteStore for GatedStore {
    async fn fetch_activity(&self, id: &str) -> SyncResult<Activity> {
        self.inner.fetch_activity(id).await
    }

    async fn fetch_page(
        &self,
        scope: &FeedScope,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> SyncResult<Vec<Activity>> {
        let page = self.inner.fetch_page(scope, cursor, limit).await?;
        self.parked.fetch_add(1, Ordering::SeqCst);
        // Acquire fails only when the semaphore is closed, which never
        // happens here.
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.parked.fetch_sub(1, Ordering::SeqCst);
        Ok(page)
    }

    async fn fetch_comment(&self, id: &str) -> SyncResult<Comment> {
        self.inner.fetch_comment(id).await
    }

    async fn fetch_profile(&self, id: &str) -> SyncResult<Profile> {
        self.inner.fetch_profile(id).await
    }

    async fn fetch_notification(&self, id: &str) -> SyncResult<Notification> {
        self.inner.fetch_notification(id).await
    }

    async fn fetch_notifications(&self, recipient_id: &str) -> SyncResult<Vec<Notification>> {
        self.inner.fetch_notifications(recipient_id).await
    }

    async fn fetch_follow_edge(&self, id: &str) -> SyncResult<FollowEdge> {
        self.inner.fetch_follow_edge(id).await
    }

    async fn follow_edge_between(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> SyncResult<Option<FollowEdge>> {
        self.inner.follow_edge_between(follower_id, followee_id).await
    }

    async fn fetch_followees(&self, follower_id: &str) -> SyncResult<Vec<FollowEdge>> {
        self.inner.fetch_followees(follower_id).await
    }

    async fn fetch_follow_request(&self, id: &str) -> SyncResult<FollowRequest> {
        self.inner.fetch_follow_request(id).await
    }

    async fn pending_request_between(
        &self,
        requester_id: &str,
        target_id: &str,
    ) -> SyncResult<Option<FollowRequest>> {
        self.inner
            .pending_request_between(requester_id, target_id)
            .await
    }

    async fn fetch_received_requests(&self, target_id: &str) -> SyncResult<Vec<FollowRequest>> {
        self.inner.fetch_received_requests(target_id).await
    }

    async fn fetch_sent_requests(&self, requester_id: &str) -> SyncResult<Vec<FollowRequest>> {
        self.inner.fetch_sent_requests(requester_id).await
    }

    async fn mutate(&self, command: MutateCommand) -> SyncResult<StoreEntity> {
        self.inner.mutate(command).await
    }
}

/// Seed a public profile.
pub fn seed_public(store: &MemoryStore, username: &str) -> Profile {
    store.add_profile(username, Visibility::Public)
}

/// Seed a private profile.
pub fn seed_private(store: &MemoryStore, username: &str) -> Profile {
    store.add_profile(username, Visibility::Private)
}
