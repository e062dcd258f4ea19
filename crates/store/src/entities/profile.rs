//! Profile entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile visibility.
///
/// Drives the follow workflow: public profiles are followed directly,
/// private profiles only through an approved follow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    /// Anyone may follow directly; activities are visible to everyone.
    Public,
    /// Follows require approval; activities are visible to accepted followers.
    Private,
}

/// A user profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Unique profile id
    pub id: String,

    /// Unique handle
    pub username: String,

    /// Display name
    pub display_name: Option<String>,

    /// Privacy flag, inherited by the profile's activities
    pub visibility: Visibility,

    /// Registration time
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Whether follows of this profile must be approved.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        matches!(self.visibility, Visibility::Private)
    }
}
