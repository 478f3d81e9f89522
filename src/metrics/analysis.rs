//! Bucketing and derived-metric math shared by every `MetricsSink` backend,
//! so the in-memory and SQLite stores agree byte-for-byte on `analysis()`.

use crate::domain::path::resolve_numeric;
use crate::domain::Sample;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Hour,
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Growth,
    Engagement,
    Reach,
    Summary,
}

/// Truncate `at` down to the start of its bucket. Weeks are Monday-based,
/// entirely in UTC (spec §4.6).
pub fn bucket_start(at: DateTime<Utc>, group_by: GroupBy) -> DateTime<Utc> {
    let date = at.date_naive();
    match group_by {
        GroupBy::Hour => Utc
            .with_ymd_and_hms(date.year(), date.month(), date.day(), at.hour(), 0, 0)
            .single()
            .unwrap_or(at),
        GroupBy::Day => Utc
            .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
            .single()
            .unwrap_or(at),
        GroupBy::Week => {
            let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
            Utc.with_ymd_and_hms(monday.year(), monday.month(), monday.day(), 0, 0, 0)
                .single()
                .unwrap_or(at)
        }
        GroupBy::Month => Utc
            .with_ymd_and_hms(date.year(), date.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(at),
    }
}

/// Bucket `samples` by truncated `observed_at`. Within a bucket the
/// representative Sample is the first one encountered once samples are
/// sorted ascending; buckets are emitted in ascending time order.
pub fn group_into_buckets(mut samples: Vec<Sample>, group_by: GroupBy) -> Vec<(DateTime<Utc>, Sample)> {
    samples.sort_by_key(|s| s.observed_at);
    let mut buckets: Vec<(DateTime<Utc>, Sample)> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for sample in samples {
        let bucket = bucket_start(sample.observed_at, group_by);
        if seen.insert(bucket) {
            buckets.push((bucket, sample));
        }
    }
    buckets
}

#[derive(Debug, Clone, Serialize)]
pub struct Growth {
    pub absolute: f64,
    pub percent: f64,
    pub per_day: f64,
}

/// `absolute = X(bn) - X(b0)`; `percent = absolute/X(b0) * 100` (0 when
/// `X(b0) == 0`); `per_day = absolute / max(1 day, timespan)`.
pub fn growth(buckets: &[(DateTime<Utc>, Sample)], metric: &str) -> Option<Growth> {
    let (first_at, first) = buckets.first()?;
    let (last_at, last) = buckets.last()?;
    let x0 = resolve_numeric(first, metric)?;
    let xn = resolve_numeric(last, metric)?;
    let absolute = xn - x0;
    let percent = if x0 == 0.0 { 0.0 } else { (absolute / x0) * 100.0 };
    let timespan_days = ((*last_at - *first_at).num_seconds() as f64 / 86_400.0).max(1.0);
    let per_day = absolute / timespan_days;
    Some(Growth { absolute, percent, per_day })
}

/// Arithmetic mean across buckets with a present value for `metric`,
/// rounded to the nearest integer. `None` if no bucket carries the field.
pub fn engagement_average(buckets: &[(DateTime<Utc>, Sample)], metric: &str) -> Option<i64> {
    let values: Vec<f64> = buckets.iter().filter_map(|(_, s)| resolve_numeric(s, metric)).collect();
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(mean.round() as i64)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReachPoint {
    pub bucket: DateTime<Utc>,
    pub impressions: f64,
    pub profile_visits: f64,
}

/// Synthetic reach estimator (spec §4.6, no real impression data available):
/// `impressions = 0.10 * followers`, `profileVisits = 0.05 * followers`.
pub fn reach(buckets: &[(DateTime<Utc>, Sample)]) -> Vec<ReachPoint> {
    buckets
        .iter()
        .map(|(bucket, s)| ReachPoint {
            bucket: *bucket,
            impressions: s.followers as f64 * 0.10,
            profile_visits: s.followers as f64 * 0.05,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub current: Sample,
    pub followers_growth: Option<Growth>,
    pub following_growth: Option<Growth>,
    pub posts_growth: Option<Growth>,
    pub engagement_rate: f64,
}

/// Current snapshot, growth, per-day derivatives, and overall engagement
/// rate, combined (spec §4.6).
pub fn summary(buckets: &[(DateTime<Utc>, Sample)]) -> Option<Summary> {
    let (_, latest) = buckets.last()?;
    Some(Summary {
        current: latest.clone(),
        followers_growth: growth(buckets, "followers"),
        following_growth: growth(buckets, "following"),
        posts_growth: growth(buckets, "posts"),
        engagement_rate: latest.engagement_rate(),
    })
}

/// Run one `analysis(kind, ...)` call over one account's already
/// time/account-filtered samples.
pub fn evaluate(samples: Vec<Sample>, kind: AnalysisKind, group_by: GroupBy) -> serde_json::Value {
    let buckets = group_into_buckets(samples, group_by);
    match kind {
        AnalysisKind::Growth => serde_json::json!({
            "followers": growth(&buckets, "followers"),
            "following": growth(&buckets, "following"),
            "posts": growth(&buckets, "posts"),
        }),
        AnalysisKind::Engagement => serde_json::json!({
            "avgLikes": engagement_average(&buckets, "engagement.avg_likes"),
            "avgRetweets": engagement_average(&buckets, "engagement.avg_retweets"),
            "avgReplies": engagement_average(&buckets, "engagement.avg_replies"),
        }),
        AnalysisKind::Reach => serde_json::json!(reach(&buckets)),
        AnalysisKind::Summary => serde_json::json!(summary(&buckets)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::Engagement;

    fn sample(account_id: &str, observed_at: DateTime<Utc>, followers: u64) -> Sample {
        Sample {
            account_id: account_id.into(),
            observed_at,
            followers,
            following: 10,
            posts: 5,
            engagement: Engagement::default(),
            source: Sample::SOURCE_SCRAPER.into(),
            previous_ref: None,
        }
    }

    #[test]
    fn week_buckets_truncate_to_monday() {
        let sunday = Utc.with_ymd_and_hms(2026, 7, 26, 14, 0, 0).unwrap();
        let bucket = bucket_start(sunday, GroupBy::Week);
        assert_eq!(bucket.weekday(), chrono::Weekday::Mon);
        assert!(bucket <= sunday);
    }

    #[test]
    fn growth_is_zero_percent_when_baseline_is_zero() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::days(2);
        let buckets = vec![(t0, sample("a1", t0, 0)), (t1, sample("a1", t1, 50))];
        let g = growth(&buckets, "followers").unwrap();
        assert_eq!(g.absolute, 50.0);
        assert_eq!(g.percent, 0.0);
        assert_eq!(g.per_day, 25.0);
    }

    #[test]
    fn per_day_clamps_timespan_to_at_least_one_day() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(1);
        let buckets = vec![(t0, sample("a1", t0, 100)), (t1, sample("a1", t1, 110))];
        let g = growth(&buckets, "followers").unwrap();
        assert_eq!(g.per_day, 10.0);
    }
}
