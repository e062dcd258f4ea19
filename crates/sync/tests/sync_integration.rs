//! Sync engine integration tests.
//!
//! These tests run whole sessions against an in-process store and verify the
//! end-to-end properties: live feed splicing, optimistic mutations that
//! converge with the authoritative state, the follow state machine across
//! two viewers, and notification aggregation.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use brewlog_common::{Config, FeedConfig, NotificationConfig, RetryConfig, SyncError};
use brewlog_store::test_utils::{FlakyStore, seed_private, seed_public};
use brewlog_store::{
    ActivityDraft, FeedScope, FollowDecision, MemoryStore, MutateCommand, Profile, RemoteStore,
};
use brewlog_sync::{FollowState, LikeView, Mutation, SyncSession};

fn fast_config() -> Config {
    Config {
        feed: FeedConfig { page_size: 10 },
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
        },
        notifications: NotificationConfig::default(),
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

async fn start_session(store: &Arc<MemoryStore>, viewer: &Profile) -> SyncSession {
    SyncSession::start(
        store.clone(),
        store.clone(),
        viewer.id.clone(),
        FeedScope::Following {
            viewer_id: viewer.id.clone(),
        },
        &fast_config(),
    )
    .await
    .unwrap()
}

async fn wait_until<F>(what: &str, mut done: F)
where
    F: AsyncFnMut() -> bool,
{
    for _ in 0..400 {
        if done().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_followee_post_splices_at_head() {
    let store = Arc::new(MemoryStore::new());
    let alice = seed_public(&store, "alice");
    let bob = seed_public(&store, "bob");
    store.add_follow_edge(&alice.id, &bob.id);
    let first = store.add_activity(&bob.id, &draft("ethiopia sidamo")).unwrap();
    let second = store.add_activity(&bob.id, &draft("kenya aa")).unwrap();

    let session = start_session(&store, &alice).await;
    let loaded: Vec<String> = session
        .reconciler()
        .snapshot()
        .await
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(loaded, vec![second.id.clone(), first.id.clone()]);

    // A post while the session is live lands at the head without touching
    // the already-loaded order.
    let third = store.add_activity(&bob.id, &draft("colombia huila")).unwrap();
    wait_until("new post at head", async || {
        session
            .reconciler()
            .snapshot()
            .await
            .first()
            .is_some_and(|a| a.id == third.id)
    })
    .await;

    let ids: Vec<String> = session
        .reconciler()
        .snapshot()
        .await
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec![third.id, second.id, first.id]);

    session.close().await;
}

#[tokio::test]
async fn test_like_round_trip_converges_across_sessions() {
    let store = Arc::new(MemoryStore::new());
    let alice = seed_public(&store, "alice");
    let bob = seed_public(&store, "bob");
    store.add_follow_edge(&alice.id, &bob.id);
    let post = store.add_activity(&bob.id, &draft("geisha")).unwrap();

    let alice_session = start_session(&store, &alice).await;
    let bob_session = start_session(&store, &bob).await;

    alice_session
        .coordinator()
        .apply(Mutation::ToggleLike {
            activity_id: post.id.clone(),
        })
        .await
        .unwrap();

    // The store confirmed; both renderings converge on the same state.
    let stored = store.fetch_activity(&post.id).await.unwrap();
    assert_eq!(stored.like_count, 1);
    assert!(stored.is_liked_by(&alice.id));
    assert_eq!(
        alice_session
            .coordinator()
            .effective_like_view(&post.id)
            .await,
        Some(LikeView {
            liked: true,
            like_count: 1
        })
    );
    wait_until("bob sees the like", async || {
        bob_session
            .reconciler()
            .get(&post.id)
            .await
            .is_some_and(|a| a.like_count == 1)
    })
    .await;
    wait_until("bob is notified", async || {
        bob_session.notifications().unread_count() == 1
    })
    .await;

    // Toggling again restores the original state everywhere.
    alice_session
        .coordinator()
        .apply(Mutation::ToggleLike {
            activity_id: post.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(store.fetch_activity(&post.id).await.unwrap().like_count, 0);
    assert_eq!(
        alice_session
            .coordinator()
            .effective_like_view(&post.id)
            .await,
        Some(LikeView {
            liked: false,
            like_count: 0
        })
    );
    wait_until("bob sees the unlike", async || {
        bob_session
            .reconciler()
            .get(&post.id)
            .await
            .is_some_and(|a| a.like_count == 0)
    })
    .await;

    alice_session.close().await;
    bob_session.close().await;
}

#[tokio::test]
async fn test_self_like_rejected_at_both_ends() {
    let store = Arc::new(MemoryStore::new());
    let bob = seed_public(&store, "bob");
    let post = store.add_activity(&bob.id, &draft("house blend")).unwrap();

    let session = start_session(&store, &bob).await;
    let result = session
        .coordinator()
        .apply(Mutation::ToggleLike {
            activity_id: post.id.clone(),
        })
        .await;
    assert!(matches!(result, Err(SyncError::SelfLike(_))));

    // The store refuses independently of the client-side check.
    let direct = store
        .mutate(MutateCommand::ToggleLike {
            activity_id: post.id.clone(),
            profile_id: bob.id.clone(),
        })
        .await;
    assert!(matches!(direct, Err(SyncError::SelfLike(_))));
    assert_eq!(store.fetch_activity(&post.id).await.unwrap().like_count, 0);

    session.close().await;
}

#[tokio::test]
async fn test_comments_fan_in_ordered_by_creation() {
    let store = Arc::new(MemoryStore::new());
    let alice = seed_public(&store, "alice");
    let bob = seed_public(&store, "bob");
    let carol = seed_public(&store, "carol");
    store.add_follow_edge(&alice.id, &bob.id);
    let post = store.add_activity(&bob.id, &draft("burundi")).unwrap();

    let alice_session = start_session(&store, &alice).await;
    let bob_session = start_session(&store, &bob).await;

    alice_session
        .coordinator()
        .apply(Mutation::AddComment {
            activity_id: post.id.clone(),
            text: "great crema on this one".to_string(),
        })
        .await
        .unwrap();
    assert!(!alice_session.coordinator().has_pending_comment(&post.id));

    // A comment from a client outside this session arrives as an event.
    store
        .mutate(MutateCommand::AddComment {
            activity_id: post.id.clone(),
            author_id: carol.id.clone(),
            text: "try a finer grind".to_string(),
        })
        .await
        .unwrap();

    wait_until("both comments in alice's view", async || {
        alice_session
            .reconciler()
            .get(&post.id)
            .await
            .is_some_and(|a| a.comments.len() == 2)
    })
    .await;

    let reconciled = alice_session.reconciler().get(&post.id).await.unwrap();
    assert!(reconciled.comments[0].created_at <= reconciled.comments[1].created_at);
    assert_eq!(reconciled.comments[0].author_id, alice.id);
    assert_eq!(reconciled.comments[0].text, "great crema on this one");
    assert_eq!(reconciled.comments[1].author_id, carol.id);
    assert_eq!(reconciled.comments[1].text, "try a finer grind");

    wait_until("bob notified about both comments", async || {
        bob_session.notifications().unread_count() == 2
    })
    .await;

    alice_session.close().await;
    bob_session.close().await;
}

#[tokio::test]
async fn test_private_follow_state_machine_walk() {
    let store = Arc::new(MemoryStore::new());
    let alice = seed_public(&store, "alice");
    let carol = seed_private(&store, "carol");

    let alice_session = start_session(&store, &alice).await;
    let carol_session = start_session(&store, &carol).await;

    assert_eq!(
        alice_session.follow_graph().state_of(&carol.id).unwrap(),
        FollowState::None
    );

    // None -> Pending.
    alice_session
        .coordinator()
        .apply(Mutation::Follow {
            target_id: carol.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        alice_session.follow_graph().state_of(&carol.id).unwrap(),
        FollowState::Pending
    );

    // A second request while one is pending is refused locally.
    let duplicate = alice_session
        .coordinator()
        .apply(Mutation::Follow {
            target_id: carol.id.clone(),
        })
        .await;
    assert!(matches!(duplicate, Err(SyncError::DuplicateRequest(_))));

    // The request shows up on carol's side.
    wait_until("request reaches carol", async || {
        carol_session.notifications().feed().requests.len() == 1
    })
    .await;
    let request_id = carol_session.notifications().feed().requests[0].id.clone();

    // Pending -> Following on acceptance.
    carol_session
        .follow_graph()
        .respond(&request_id, FollowDecision::Accepted)
        .await
        .unwrap();
    wait_until("alice sees the acceptance", async || {
        alice_session.follow_graph().state_of(&carol.id).unwrap() == FollowState::Following
    })
    .await;
    wait_until("acceptance notification for alice", async || {
        alice_session.notifications().unread_count() == 1
    })
    .await;
    wait_until("request leaves carol's view", async || {
        carol_session.notifications().feed().requests.is_empty()
    })
    .await;

    // Following -> None.
    alice_session
        .coordinator()
        .apply(Mutation::Unfollow {
            target_id: carol.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        alice_session.follow_graph().state_of(&carol.id).unwrap(),
        FollowState::None
    );
    assert!(
        store
            .follow_edge_between(&alice.id, &carol.id)
            .await
            .unwrap()
            .is_none()
    );

    alice_session.close().await;
    carol_session.close().await;
}

#[tokio::test]
async fn test_public_follow_creates_edge_immediately() {
    let store = Arc::new(MemoryStore::new());
    let alice = seed_public(&store, "alice");
    let bob = seed_public(&store, "bob");

    let alice_session = start_session(&store, &alice).await;
    let bob_session = start_session(&store, &bob).await;

    alice_session
        .coordinator()
        .apply(Mutation::Follow {
            target_id: bob.id.clone(),
        })
        .await
        .unwrap();

    assert_eq!(
        alice_session.follow_graph().state_of(&bob.id).unwrap(),
        FollowState::Following
    );
    assert!(
        store
            .follow_edge_between(&alice.id, &bob.id)
            .await
            .unwrap()
            .is_some()
    );

    // No request is involved; bob only gets the follow notification.
    wait_until("bob notified", async || {
        bob_session.notifications().unread_count() == 1
    })
    .await;
    assert!(bob_session.notifications().feed().requests.is_empty());

    alice_session.close().await;
    bob_session.close().await;
}

#[tokio::test]
async fn test_rejected_request_can_be_retried() {
    let store = Arc::new(MemoryStore::new());
    let alice = seed_public(&store, "alice");
    let carol = seed_private(&store, "carol");

    let alice_session = start_session(&store, &alice).await;
    let carol_session = start_session(&store, &carol).await;

    alice_session
        .coordinator()
        .apply(Mutation::Follow {
            target_id: carol.id.clone(),
        })
        .await
        .unwrap();
    // One unread request notification plus the pending request itself.
    wait_until("request counted", async || {
        carol_session.notifications().unread_count() == 2
    })
    .await;
    let request_id = carol_session.notifications().feed().requests[0].id.clone();

    carol_session
        .follow_graph()
        .respond(&request_id, FollowDecision::Rejected)
        .await
        .unwrap();
    // The request leaves the badge; the notification stays unread.
    wait_until("rejection settles for carol", async || {
        carol_session.notifications().unread_count() == 1
    })
    .await;
    wait_until("rejection settles for alice", async || {
        alice_session.follow_graph().state_of(&carol.id).unwrap() == FollowState::None
    })
    .await;

    // A fresh request goes through.
    alice_session
        .coordinator()
        .apply(Mutation::Follow {
            target_id: carol.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        alice_session.follow_graph().state_of(&carol.id).unwrap(),
        FollowState::Pending
    );
    wait_until("second request reaches carol", async || {
        carol_session.notifications().feed().requests.len() == 1
    })
    .await;

    alice_session.close().await;
    carol_session.close().await;
}

#[tokio::test]
async fn test_failed_mutation_rolls_back_view() {
    let memory = Arc::new(MemoryStore::new());
    let alice = seed_public(&memory, "alice");
    let bob = seed_public(&memory, "bob");
    memory.add_follow_edge(&alice.id, &bob.id);
    let post = memory.add_activity(&bob.id, &draft("decaf colombia")).unwrap();

    let flaky = Arc::new(FlakyStore::new(memory.clone()));
    let session = SyncSession::start(
        flaky.clone(),
        memory.clone(),
        alice.id.clone(),
        FeedScope::Following {
            viewer_id: alice.id.clone(),
        },
        &fast_config(),
    )
    .await
    .unwrap();

    flaky.fail_next_mutations(1);
    let result = session
        .coordinator()
        .apply(Mutation::ToggleLike {
            activity_id: post.id.clone(),
        })
        .await;
    assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));

    // Rolled back exactly; nothing reached the store.
    assert_eq!(
        session.coordinator().effective_like_view(&post.id).await,
        Some(LikeView {
            liked: false,
            like_count: 0
        })
    );
    assert_eq!(memory.fetch_activity(&post.id).await.unwrap().like_count, 0);

    // The next attempt is a fresh toggle, not a replay.
    session
        .coordinator()
        .apply(Mutation::ToggleLike {
            activity_id: post.id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(memory.fetch_activity(&post.id).await.unwrap().like_count, 1);

    session.close().await;
}

#[tokio::test]
async fn test_close_detaches_every_subscription() {
    let store = Arc::new(MemoryStore::new());
    let alice = seed_public(&store, "alice");
    let bob = seed_public(&store, "bob");

    let alice_session = start_session(&store, &alice).await;
    let bob_session = start_session(&store, &bob).await;
    assert_eq!(store.subscriber_count(), 12);

    alice_session.close().await;
    assert_eq!(store.subscriber_count(), 6);

    bob_session.close().await;
    assert_eq!(store.subscriber_count(), 0);
}
