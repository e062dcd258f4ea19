//! Comment entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment on a brew activity.
///
/// Append-only: comments are never edited and deletion is not modeled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Unique comment id
    pub id: String,

    /// The activity this comment belongs to
    pub activity_id: String,

    /// The profile that wrote the comment
    pub author_id: String,

    /// Comment body
    pub text: String,

    /// Creation time
    pub created_at: DateTime<Utc>,
}
