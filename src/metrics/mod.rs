//! The Metrics Store: append-only time series keyed by account, with
//! latest/range reads and grouped derived-metric analysis (spec §4.6).

pub mod analysis;
mod memory;
mod sqlite;

pub use analysis::{AnalysisKind, GroupBy};
pub use memory::InMemoryMetricsStore;
pub use sqlite::SqliteMetricsStore;

use crate::domain::account::AccountId;
use crate::domain::path;
use crate::domain::Sample;
use crate::error::EngineResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Append `sample`. Fails with `Conflict` iff `(account_id, observed_at)`
    /// already exists (spec §4.6).
    async fn put(&self, sample: Sample) -> EngineResult<()>;

    async fn latest_for(&self, account_id: &AccountId) -> EngineResult<Option<Sample>>;

    /// The most recent sample per account across the whole store,
    /// newest-first, projected down to `fields` if non-empty.
    async fn latest(&self, limit: usize, fields: &[String]) -> EngineResult<Vec<serde_json::Value>>;

    /// Samples for one account within `[from, to]`, newest-first.
    async fn range(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
        fields: &[String],
    ) -> EngineResult<Vec<serde_json::Value>>;

    async fn analysis(
        &self,
        kind: AnalysisKind,
        account_ids: &[AccountId],
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        group_by: GroupBy,
    ) -> EngineResult<serde_json::Value>;
}

/// Shared by both backends: run `analysis` once samples for the requested
/// accounts/range have already been loaded.
fn analysis_over(
    samples_by_account: Vec<(AccountId, Vec<Sample>)>,
    kind: AnalysisKind,
    group_by: GroupBy,
) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    for (account_id, samples) in samples_by_account {
        out.insert(account_id, analysis::evaluate(samples, kind, group_by));
    }
    serde_json::Value::Object(out)
}

fn project_all(samples: Vec<Sample>, fields: &[String]) -> Vec<serde_json::Value> {
    samples.iter().map(|s| path::project(s, fields)).collect()
}

fn in_range(at: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.map_or(true, |from| at >= from) && to.map_or(true, |to| at <= to)
}
