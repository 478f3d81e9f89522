//! SQLite-backed `MetricsSink`, selected by `config.storage.backend`.

use super::{analysis_over, project_all, AnalysisKind, GroupBy, MetricsSink};
use crate::domain::account::AccountId;
use crate::domain::sample::Engagement;
use crate::domain::Sample;
use crate::error::{EngineError, EngineResult};
use crate::storage::SqlitePool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

fn internal<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::Internal(e.to_string())
}

pub struct SqliteMetricsStore {
    pool: SqlitePool,
}

impl SqliteMetricsStore {
    /// Assumes `crate::storage::sqlite::open_pool` already ran the shared
    /// migration; adds the `samples` table this store owns.
    pub fn new(pool: SqlitePool) -> EngineResult<Self> {
        let conn = pool.get().map_err(internal)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS samples (
                account_id TEXT NOT NULL,
                observed_at TEXT NOT NULL,
                followers INTEGER NOT NULL,
                following INTEGER NOT NULL,
                posts INTEGER NOT NULL,
                avg_likes INTEGER NOT NULL,
                avg_retweets INTEGER NOT NULL,
                avg_replies INTEGER NOT NULL,
                source TEXT NOT NULL,
                previous_ref TEXT,
                PRIMARY KEY (account_id, observed_at)
            );",
        )
        .map_err(internal)?;
        Ok(Self { pool })
    }
}

fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<Sample> {
    Ok(Sample {
        account_id: row.get("account_id")?,
        observed_at: row.get("observed_at")?,
        followers: row.get::<_, i64>("followers")? as u64,
        following: row.get::<_, i64>("following")? as u64,
        posts: row.get::<_, i64>("posts")? as u64,
        engagement: Engagement {
            avg_likes: row.get::<_, i64>("avg_likes")? as u64,
            avg_retweets: row.get::<_, i64>("avg_retweets")? as u64,
            avg_replies: row.get::<_, i64>("avg_replies")? as u64,
        },
        source: row.get("source")?,
        previous_ref: row.get("previous_ref")?,
    })
}

#[async_trait]
impl MetricsSink for SqliteMetricsStore {
    async fn put(&self, sample: Sample) -> EngineResult<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM samples WHERE account_id = ?1 AND observed_at = ?2",
                    params![sample.account_id, sample.observed_at],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if exists {
                return Err(EngineError::Conflict(format!(
                    "sample already exists for {} at {}",
                    sample.account_id, sample.observed_at
                )));
            }
            conn.execute(
                "INSERT INTO samples (account_id, observed_at, followers, following, posts,
                    avg_likes, avg_retweets, avg_replies, source, previous_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    sample.account_id,
                    sample.observed_at,
                    sample.followers as i64,
                    sample.following as i64,
                    sample.posts as i64,
                    sample.engagement.avg_likes as i64,
                    sample.engagement.avg_retweets as i64,
                    sample.engagement.avg_replies as i64,
                    sample.source,
                    sample.previous_ref,
                ],
            )
            .map_err(internal)?;
            Ok(())
        })
        .await
        .map_err(internal)?
    }

    async fn latest_for(&self, account_id: &AccountId) -> EngineResult<Option<Sample>> {
        let pool = self.pool.clone();
        let account_id = account_id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM samples WHERE account_id = ?1
                     ORDER BY observed_at DESC LIMIT 1",
                )
                .map_err(internal)?;
            let mut rows = stmt.query_map(params![account_id], row_to_sample).map_err(internal)?;
            match rows.next() {
                Some(row) => Ok(Some(row.map_err(internal)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(internal)?
    }

    async fn latest(&self, limit: usize, fields: &[String]) -> EngineResult<Vec<serde_json::Value>> {
        let pool = self.pool.clone();
        let fields = fields.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let mut stmt = conn
                .prepare(
                    "SELECT s.* FROM samples s
                     INNER JOIN (
                        SELECT account_id, MAX(observed_at) AS max_at FROM samples GROUP BY account_id
                     ) latest ON s.account_id = latest.account_id AND s.observed_at = latest.max_at
                     ORDER BY s.observed_at DESC LIMIT ?1",
                )
                .map_err(internal)?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_sample)
                .map_err(internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(internal)?;
            Ok(project_all(rows, &fields))
        })
        .await
        .map_err(internal)?
    }

    async fn range(
        &self,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
        fields: &[String],
    ) -> EngineResult<Vec<serde_json::Value>> {
        let pool = self.pool.clone();
        let account_id = account_id.clone();
        let fields = fields.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM samples WHERE account_id = ?1 AND observed_at BETWEEN ?2 AND ?3
                     ORDER BY observed_at DESC LIMIT ?4",
                )
                .map_err(internal)?;
            let rows = stmt
                .query_map(params![account_id, from, to, limit as i64], row_to_sample)
                .map_err(internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(internal)?;
            Ok(project_all(rows, &fields))
        })
        .await
        .map_err(internal)?
    }

    async fn analysis(
        &self,
        kind: AnalysisKind,
        account_ids: &[AccountId],
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        group_by: GroupBy,
    ) -> EngineResult<serde_json::Value> {
        let pool = self.pool.clone();
        let account_ids = account_ids.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let mut per_account = Vec::with_capacity(account_ids.len());
            for account_id in account_ids {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM samples WHERE account_id = ?1
                         AND (?2 IS NULL OR observed_at >= ?2)
                         AND (?3 IS NULL OR observed_at <= ?3)",
                    )
                    .map_err(internal)?;
                let rows = stmt
                    .query_map(params![account_id, from, to], row_to_sample)
                    .map_err(internal)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(internal)?;
                per_account.push((account_id, rows));
            }
            Ok(analysis_over(per_account, kind, group_by))
        })
        .await
        .map_err(internal)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_pool;

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
    async fn round_trips_a_sample_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("metrics.db")).unwrap();
        let store = SqliteMetricsStore::new(pool).unwrap();
        let at = Utc::now();
        store.put(sample("a1", at, 100)).await.unwrap();
        let err = store.put(sample("a1", at, 200)).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        let latest = store.latest_for(&"a1".to_string()).await.unwrap().unwrap();
        assert_eq!(latest.followers, 100);
    }
}
