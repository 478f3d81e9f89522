//! One observation of an account's counts and engagement.

use super::account::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean like/retweet/reply counts over the recent posts observed in one
/// scrape (§3: computed over the last ≤20 recent posts; zero when no posts).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub avg_likes: u64,
    pub avg_retweets: u64,
    pub avg_replies: u64,
}

/// One time-stamped observation for one account. Immutable once produced:
/// the Fetcher creates it, the Metrics Store appends it, nothing ever
/// mutates or deletes it (§3 Lifecycles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub account_id: AccountId,
    pub observed_at: DateTime<Utc>,
    pub followers: u64,
    pub following: u64,
    pub posts: u64,
    pub engagement: Engagement,
    /// Always `"scraper"` for samples the Fetcher produces; kept as a field
    /// (rather than hard-coded) so a future ingestion path can tag its
    /// origin without a schema change.
    pub source: String,
    /// The prior Sample's `observed_at` for this account, if any.
    pub previous_ref: Option<DateTime<Utc>>,
}

impl Sample {
    pub const SOURCE_SCRAPER: &'static str = "scraper";

    /// Overall engagement rate used by `analysis(summary)`:
    /// `(avgLikes+avgRetweets+avgReplies) / max(1, followers) * 100`, to 2dp.
    pub fn engagement_rate(&self) -> f64 {
        let total = (self.engagement.avg_likes
            + self.engagement.avg_retweets
            + self.engagement.avg_replies) as f64;
        let denom = self.followers.max(1) as f64;
        (total / denom * 100.0 * 100.0).round() / 100.0
    }
}
