//! Entity model shared by the sync engine and the authoritative store.

pub mod activity;
pub mod comment;
pub mod follow_edge;
pub mod follow_request;
pub mod notification;
pub mod profile;

pub use activity::Activity;
pub use comment::Comment;
pub use follow_edge::FollowEdge;
pub use follow_request::{FollowRequest, FollowRequestStatus};
pub use notification::{Notification, NotificationKind};
pub use profile::{Profile, Visibility};
