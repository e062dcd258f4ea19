//! Brew activity entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::comment::Comment;
use super::profile::Visibility;

/// A logged brew activity.
///
/// Content fields are owned exclusively by the author; `liked_by` and
/// `comments` are shared-mutable and only ever change through store
/// mutations. The store keeps `like_count` equal to `liked_by.len()` and
/// never lets the author appear in `liked_by`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Unique activity id
    pub id: String,

    /// The profile that logged this brew
    pub author_id: String,

    /// Inherited from the author's profile
    pub visibility: Visibility,

    /// Brew method (e.g. "v60", "aeropress")
    pub method: String,

    /// Coffee name
    pub coffee_name: String,

    /// Ground coffee dose in grams
    pub dose_grams: u32,

    /// Brew water in grams
    pub water_grams: u32,

    /// Free-text tasting notes
    pub notes: Option<String>,

    /// Likes count (denormalized)
    pub like_count: u32,

    /// Profiles that liked this activity, in like order
    pub liked_by: Vec<String>,

    /// Comments ordered by (`created_at`, id) ascending
    pub comments: Vec<Comment>,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// Whether `profile_id` has liked this activity.
    #[must_use]
    pub fn is_liked_by(&self, profile_id: &str) -> bool {
        self.liked_by.iter().any(|id| id == profile_id)
    }
}
