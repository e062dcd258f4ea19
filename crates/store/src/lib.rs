//! Authoritative-store model and interfaces for brewlog.
//!
//! This crate defines what the sync engine talks to:
//!
//! - **Entities**: [`Activity`], [`Comment`], [`Profile`], [`FollowEdge`],
//!   [`FollowRequest`], [`Notification`]
//! - **Commands**: [`MutateCommand`] and the [`StoreEntity`] mutation reply
//! - **Events**: [`ChangeEvent`] hints delivered through [`Topic`]-filtered
//!   subscriptions
//! - **Interfaces**: the [`RemoteStore`] and [`ChangeFeed`] collaborator
//!   traits
//! - **Reference implementation**: [`MemoryStore`], an in-process store
//!   with server-side invariant enforcement and notification fan-out
//!
//! The `test-utils` feature adds failure injection for exercising retry and
//! rollback paths.

pub mod commands;
pub mod entities;
pub mod events;
pub mod memory;
pub mod remote;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use commands::{ActivityDraft, CommentDraft, FollowDecision, MutateCommand, StoreEntity};
pub use entities::{
    Activity, Comment, FollowEdge, FollowRequest, FollowRequestStatus, Notification,
    NotificationKind, Profile, Visibility,
};
pub use events::{ChangeEvent, ChangeKind, EntityKind, Topic, TopicScope};
pub use memory::MemoryStore;
pub use remote::{
    ChangeFeed, ChangeFeedService, Cursor, FeedScope, RemoteStore, RemoteStoreService,
    Subscription, SubscriptionStream,
};
