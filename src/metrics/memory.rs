//! In-memory reference `MetricsSink`. Authoritative for tests; the default
//! backend when `config.storage.backend != "sqlite"`.

use super::{analysis_over, in_range, project_all, AnalysisKind, GroupBy, MetricsSink};
use crate::domain::account::AccountId;
use crate::domain::Sample;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryMetricsStore {
    /// Kept sorted ascending by `observed_at` per account.
    samples: DashMap<AccountId, Vec<Sample>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn samples_for(&self, account_id: &AccountId, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Vec<Sample> {
        self.samples
            .get(account_id)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|s| in_range(s.observed_at, from, to))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsStore {
    async fn put(&self, sample: Sample) -> EngineResult<()> {
        let mut entry = self.samples.entry(sample.account_id.clone()).or_default();
        if entry.iter().any(|s| s.observed_at == sample.observed_at) {
            return Err(EngineError::Conflict(format!(
                "sample already exists for {} at {}",
                sample.account_id, sample.observed_at
            )));
        }
        entry.push(sample);
        entry.sort_by_key(|s| s.observed_at);
        Ok(())
    }

    async fn latest_for(&self, account_id: &AccountId) -> EngineResult<Option<Sample>> {
        Ok(self.samples.get(account_id).and_then(|entry| entry.last().cloned()))
    }

    async fn latest(&self, limit: usize, fields: &[String]) -> EngineResult<Vec<serde_json::Value>> {
        let mut all: Vec<Sample> = self
            .samples
            .iter()
            .filter_map(|entry| entry.value().last().cloned())
            .collect();
        all.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        all.truncate(limit);
        Ok(project_all(all, fields))
    }

    async fn range(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
        fields: &[String],
    ) -> EngineResult<Vec<serde_json::Value>> {
        let mut matched = self.samples_for(account_id, Some(from), Some(to));
        matched.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        matched.truncate(limit);
        Ok(project_all(matched, fields))
    }

    async fn analysis(
        &self,
        kind: AnalysisKind,
        account_ids: &[AccountId],
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        group_by: GroupBy,
    ) -> EngineResult<serde_json::Value> {
        let per_account = account_ids
            .iter()
            .map(|id| (id.clone(), self.samples_for(id, from, to)))
            .collect();
        Ok(analysis_over(per_account, kind, group_by))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::Engagement;
    use chrono::Duration;

    fn sample(account_id: &str, observed_at: DateTime<Utc>, followers: u64) -> Sample {
        Sample {
            account_id: account_id.into(),
            observed_at,
            followers,
            following: 1,
            posts: 1,
            engagement: Engagement::default(),
            source: Sample::SOURCE_SCRAPER.into(),
            previous_ref: None,
        }
    }

    #[tokio::test]
    async fn put_rejects_duplicate_account_and_timestamp() {
        let store = InMemoryMetricsStore::new();
        let at = Utc::now();
        store.put(sample("a1", at, 100)).await.unwrap();
        let err = store.put(sample("a1", at, 101)).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn latest_for_returns_the_newest_sample() {
        let store = InMemoryMetricsStore::new();
        let t0 = Utc::now();
        store.put(sample("a1", t0, 100)).await.unwrap();
        store.put(sample("a1", t0 + Duration::seconds(1), 110)).await.unwrap();
        let latest = store.latest_for(&"a1".to_string()).await.unwrap().unwrap();
        assert_eq!(latest.followers, 110);
    }

    #[tokio::test]
    async fn range_is_newest_first_and_bounded_by_limit() {
        let store = InMemoryMetricsStore::new();
        let t0 = Utc::now();
        for i in 0..5 {
            store.put(sample("a1", t0 + Duration::seconds(i), 100 + i as u64)).await.unwrap();
        }
        let page = store
            .range(&"a1".to_string(), t0, t0 + Duration::seconds(10), 2, &[])
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["followers"], 104);
        assert_eq!(page[1]["followers"], 103);
    }
}
