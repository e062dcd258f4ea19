//! Live synchronization engine for brewlog clients.
//!
//! Keeps a signed-in viewer's world current against the authoritative store:
//!
//! - **Feed**: [`FeedReconciler`] materializes a paged activity view and
//!   folds change-feed hints into it in per-activity arrival order
//! - **Mutations**: [`MutationCoordinator`] applies likes, comments and
//!   follow changes optimistically, serialized per target, with rollback on
//!   failure
//! - **Follow graph**: [`FollowGraph`] tracks the viewer's outgoing
//!   relations through the request/accept state machine
//! - **Notifications**: [`NotificationAggregator`] maintains the
//!   notification list and incoming follow requests behind one watch channel
//! - **Session**: [`SyncSession`] wires the above over a store and change
//!   feed and owns their event loops
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use brewlog_common::Config;
//! use brewlog_store::{FeedScope, MemoryStore, Visibility};
//! use brewlog_sync::{Mutation, SyncSession};
//!
//! # async fn example() -> brewlog_common::SyncResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let viewer = store.add_profile("alice", Visibility::Public);
//!
//! let session = SyncSession::start(
//!     store.clone(),
//!     store,
//!     viewer.id.clone(),
//!     FeedScope::Following {
//!         viewer_id: viewer.id,
//!     },
//!     &Config::default(),
//! )
//! .await?;
//!
//! for activity in session.reconciler().snapshot().await {
//!     session
//!         .coordinator()
//!         .apply(Mutation::ToggleLike {
//!             activity_id: activity.id,
//!         })
//!         .await?;
//! }
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod follow_graph;
pub mod keyed;
pub mod mutation;
pub mod notifications;
pub mod overlay;
pub mod reconciler;
pub mod retry;
pub mod session;

pub use follow_graph::{FollowGraph, FollowState};
pub use keyed::KeyedQueue;
pub use mutation::{Mutation, MutationCoordinator};
pub use notifications::{NotificationAggregator, NotificationFeed};
pub use overlay::{LikeOverlay, LikeView};
pub use reconciler::{FeedReconciler, ViewUpdate};
pub use retry::RetryPolicy;
pub use session::SyncSession;
