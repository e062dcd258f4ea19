//! Optimistic like overlay.
//!
//! Pure state transitions for the presentation layer that sits on top of the
//! reconciled feed. The overlay never rewrites the reconciled copy; it is
//! merged over it at read time and discarded once the store catches up.

use brewlog_store::Activity;
use serde::{Deserialize, Serialize};

/// Like state of one activity as presented to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeView {
    /// Whether the viewer has liked the activity.
    pub liked: bool,
    /// Total like count across all profiles.
    pub like_count: u32,
}

impl LikeView {
    /// Read the viewer's like state off a reconciled activity.
    #[must_use]
    pub fn of(activity: &Activity, viewer_id: &str) -> Self {
        Self {
            liked: activity.is_liked_by(viewer_id),
            like_count: activity.like_count,
        }
    }

    /// The view after one like toggle.
    #[must_use]
    pub const fn toggled(self) -> Self {
        if self.liked {
            Self {
                liked: false,
                like_count: self.like_count.saturating_sub(1),
            }
        } else {
            Self {
                liked: true,
                like_count: self.like_count + 1,
            }
        }
    }
}

/// Overlay entry for one activity the viewer has toggled.
///
/// `confirmed` is the last state the store acknowledged for the viewer;
/// `desired` is where the viewer's taps have moved the presentation. The
/// count in `desired` is local arithmetic only; convergence decisions go by
/// membership (`liked`), so counts bumped by other profiles in the meantime
/// cannot re-trigger a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeOverlay {
    /// Last store-acknowledged state.
    pub confirmed: LikeView,
    /// State the viewer expects to see.
    pub desired: LikeView,
}

impl LikeOverlay {
    /// Start an overlay from the reconciled state, with nothing pending.
    #[must_use]
    pub const fn anchored(confirmed: LikeView) -> Self {
        Self {
            confirmed,
            desired: confirmed,
        }
    }

    /// Apply one optimistic toggle to the desired state.
    #[must_use]
    pub const fn toggle(self) -> Self {
        Self {
            confirmed: self.confirmed,
            desired: self.desired.toggled(),
        }
    }

    /// Whether the store already agrees with the desired membership.
    ///
    /// A settled entry lets a queued toggle drain as a no-op: rapid
    /// double-taps cancel out instead of issuing two remote calls.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.confirmed.liked == self.desired.liked
    }

    /// Adopt the store's answer after a successful toggle.
    ///
    /// The desired count is rebased onto the authoritative count so likes
    /// from other profiles that landed during the call are not dropped. When
    /// a further tap arrived mid-flight the desired membership is kept and
    /// re-derived from the authoritative view.
    #[must_use]
    pub const fn settle_success(self, authoritative: LikeView) -> Self {
        let desired = if self.desired.liked == authoritative.liked {
            authoritative
        } else {
            authoritative.toggled()
        };
        Self {
            confirmed: authoritative,
            desired,
        }
    }

    /// Roll the desired state back to the last acknowledged state.
    #[must_use]
    pub const fn settle_failure(self) -> Self {
        Self {
            confirmed: self.confirmed,
            desired: self.confirmed,
        }
    }
}
