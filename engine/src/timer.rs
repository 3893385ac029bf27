//! The resumable in-progress breast-feed timer.

use crate::{new_record_id, BreastSide, Feed, Timestamp};
use serde::{Deserialize, Serialize};

/// A running feed timer. Persisted locally so a reload can resume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedTimer {
    pub started_at: Timestamp,
    pub side: BreastSide,
}

impl FeedTimer {
    pub fn start(now: Timestamp, side: BreastSide) -> Self {
        Self {
            started_at: now,
            side,
        }
    }

    /// Switch sides without restarting the clock.
    pub fn with_side(self, side: BreastSide) -> Self {
        Self { side, ..self }
    }

    /// Whole seconds since the timer started. Zero if `now` is earlier.
    pub fn elapsed_seconds(&self, now: Timestamp) -> u64 {
        u64::try_from((now - self.started_at).num_seconds()).unwrap_or(0)
    }

    /// Stop the timer, producing the feed record to save.
    pub fn finish(&self, now: Timestamp) -> Feed {
        Feed::breast(new_record_id(), now, self.side, self.elapsed_seconds(now))
    }
}
