//! Brewlog demo client entry point.
//!
//! Seeds an in-process store with a few profiles, then walks a scripted
//! multi-user scenario through the sync engine: following, posting, liking,
//! commenting, and the private follow-request handshake. The resulting feed
//! and notification state is logged at each step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brewlog_common::Config;
use brewlog_store::{ActivityDraft, FeedScope, FollowDecision, MemoryStore, Profile, Visibility};
use brewlog_sync::{FollowState, Mutation, SyncSession};

/// Poll until `done` holds, or fail after about a second.
async fn eventually<F>(what: &str, mut done: F) -> anyhow::Result<()>
where
    F: AsyncFnMut() -> bool,
{
    for _ in 0..100 {
        if done().await {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("timed out waiting for {what}")
}

fn display_name<'a>(names: &'a HashMap<String, String>, id: &'a str) -> &'a str {
    names.get(id).map_or(id, String::as_str)
}

fn draft(method: &str, coffee: &str, dose: u32, water: u32) -> ActivityDraft {
    ActivityDraft {
        method: method.to_string(),
        coffee_name: coffee.to_string(),
        dose_grams: dose,
        water_grams: water,
        notes: None,
    }
}

async fn start_session(
    store: &Arc<MemoryStore>,
    viewer: &Profile,
    config: &Config,
) -> anyhow::Result<SyncSession> {
    let session = SyncSession::start(
        store.clone(),
        store.clone(),
        viewer.id.clone(),
        FeedScope::Following {
            viewer_id: viewer.id.clone(),
        },
        config,
    )
    .await?;
    info!(viewer = %viewer.username, "Session started");
    Ok(session)
}

async fn log_feed(names: &HashMap<String, String>, label: &str, session: &SyncSession) {
    let feed = session.reconciler().snapshot().await;
    info!(entries = feed.len(), "{label}");
    for activity in feed {
        info!(
            author = display_name(names, &activity.author_id),
            coffee = %activity.coffee_name,
            method = %activity.method,
            likes = activity.like_count,
            comments = activity.comments.len(),
            "  feed entry"
        );
    }
}

fn log_notifications(names: &HashMap<String, String>, label: &str, session: &SyncSession) {
    let feed = session.notifications().feed();
    info!(
        unread = feed.unread_count(),
        requests = feed.requests.len(),
        "{label}"
    );
    for notification in &feed.all {
        info!(
            kind = notification.kind.as_str(),
            from = display_name(names, &notification.source_profile_id),
            read = notification.is_read,
            "  notification"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brewlog=debug".into()),
        )
        .init();

    let config = Config::load()?;

    info!("Seeding store");
    let store = Arc::new(MemoryStore::new());
    let alice = store.add_profile("alice", Visibility::Public);
    let bob = store.add_profile("bob", Visibility::Public);
    let carol = store.add_profile("carol", Visibility::Private);
    let names: HashMap<String, String> = [&alice, &bob, &carol]
        .into_iter()
        .map(|p| (p.id.clone(), p.username.clone()))
        .collect();
    store.add_activity(&bob.id, &draft("v60", "ethiopia yirgacheffe", 18, 300))?;
    store.add_activity(&bob.id, &draft("aeropress", "kenya aa", 15, 220))?;

    let alice_session = start_session(&store, &alice, &config).await?;
    let bob_session = start_session(&store, &bob, &config).await?;

    // Alice follows bob; the public profile takes no handshake.
    alice_session
        .coordinator()
        .apply(Mutation::Follow {
            target_id: bob.id.clone(),
        })
        .await?;
    let state = alice_session.follow_graph().state_of(&bob.id)?;
    info!(state = ?state, "Alice followed bob");

    // The existing posts enter the view on refresh; later ones arrive live.
    alice_session.reconciler().load_initial().await?;
    log_feed(&names, "Alice's feed after following bob", &alice_session).await;

    let live_post = store.add_activity(&bob.id, &draft("espresso", "colombia huila", 18, 36))?;
    eventually("bob's new post to reach alice", async || {
        alice_session
            .reconciler()
            .snapshot()
            .await
            .first()
            .is_some_and(|a| a.id == live_post.id)
    })
    .await?;
    info!("Bob's new post spliced at the head of alice's feed");

    alice_session
        .coordinator()
        .apply(Mutation::ToggleLike {
            activity_id: live_post.id.clone(),
        })
        .await?;
    alice_session
        .coordinator()
        .apply(Mutation::AddComment {
            activity_id: live_post.id.clone(),
            text: "lovely crema, what grind setting?".to_string(),
        })
        .await?;
    info!("Alice liked and commented on the new post");

    eventually("bob's notifications", async || {
        bob_session.notifications().unread_count() >= 3
    })
    .await?;
    log_notifications(&names, "Bob's notifications", &bob_session);

    let inbox = bob_session.notifications().feed();
    if let Some(first) = inbox.all.first() {
        bob_session.notifications().mark_read(&first.id).await?;
        info!(
            unread = bob_session.notifications().unread_count(),
            "Bob read a notification"
        );
    }

    // The private profile takes the request/accept handshake.
    let carol_session = start_session(&store, &carol, &config).await?;
    alice_session
        .coordinator()
        .apply(Mutation::Follow {
            target_id: carol.id.clone(),
        })
        .await?;
    let state = alice_session.follow_graph().state_of(&carol.id)?;
    info!(state = ?state, "Alice requested to follow carol");

    eventually("the request to reach carol", async || {
        !carol_session.notifications().feed().requests.is_empty()
    })
    .await?;
    let request_id = carol_session.notifications().feed().requests[0].id.clone();
    carol_session
        .follow_graph()
        .respond(&request_id, FollowDecision::Accepted)
        .await?;
    eventually("the acceptance to reach alice", async || {
        matches!(
            alice_session.follow_graph().state_of(&carol.id),
            Ok(FollowState::Following)
        )
    })
    .await?;
    info!("Carol accepted; alice now follows her");

    // Carol's private posts are visible to her followers.
    let carol_post = store.add_activity(&carol.id, &draft("moka", "brazil santos", 14, 60))?;
    eventually("carol's post to reach alice", async || {
        alice_session
            .reconciler()
            .get(&carol_post.id)
            .await
            .is_some()
    })
    .await?;

    log_feed(&names, "Alice's final feed", &alice_session).await;
    log_notifications(&names, "Alice's notifications", &alice_session);
    log_notifications(&names, "Carol's notifications", &carol_session);

    alice_session.close().await;
    bob_session.close().await;
    carol_session.close().await;
    info!("Demo complete");
    Ok(())
}
