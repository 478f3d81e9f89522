//! The Alert Engine (spec §4.7): rule CRUD, per-sample evaluation, and the
//! append-only trigger history.

mod sink;

pub use sink::{ChannelRouter, LogSink, NotificationSink};

use crate::clock::Clock;
use crate::domain::account::AccountId;
use crate::domain::path;
use crate::domain::rule::RuleFilter;
use crate::domain::{AlertRule, Sample, TriggeredAlert};
use crate::error::{EngineError, EngineResult};
use crate::storage::AlertStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

pub struct AlertEngine {
    store: Arc<dyn AlertStore>,
    clock: Arc<dyn Clock>,
    router: ChannelRouter,
    rules: DashMap<String, AlertRule>,
    /// Insertion order, so triggers for one sample fire in rule insertion
    /// order (spec §4.7 "Ordering") rather than `DashMap`'s unspecified one.
    rule_order: Mutex<Vec<String>>,
    history: Mutex<Vec<TriggeredAlert>>,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn AlertStore>, clock: Arc<dyn Clock>, router: ChannelRouter) -> Self {
        Self {
            store,
            clock,
            router,
            rules: DashMap::new(),
            rule_order: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub async fn load(&self) -> EngineResult<()> {
        for rule in self.store.load_all().await? {
            self.index(rule);
        }
        Ok(())
    }

    fn index(&self, rule: AlertRule) {
        if !self.rules.contains_key(&rule.id) {
            self.rule_order.lock().push(rule.id.clone());
        }
        self.rules.insert(rule.id.clone(), rule);
    }

    pub async fn add(&self, rule: AlertRule) -> EngineResult<()> {
        if self.rules.contains_key(&rule.id) {
            return Err(EngineError::Conflict(format!("alert rule {} already exists", rule.id)));
        }
        self.store.upsert(&rule).await?;
        self.index(rule);
        Ok(())
    }

    pub async fn update(&self, rule: AlertRule) -> EngineResult<()> {
        if !self.rules.contains_key(&rule.id) {
            return Err(EngineError::NotFound(format!("alert rule {} not found", rule.id)));
        }
        self.store.upsert(&rule).await?;
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        if self.rules.remove(id).is_none() {
            return Err(EngineError::NotFound(format!("alert rule {id} not found")));
        }
        self.rule_order.lock().retain(|r| r != id);
        self.store.delete(id).await
    }

    pub fn get(&self, id: &str) -> Option<AlertRule> {
        self.rules.get(id).map(|e| e.value().clone())
    }

    pub fn list(&self, filter: &RuleFilter) -> Vec<AlertRule> {
        self.rules
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| filter.matches(r))
            .collect()
    }

    pub fn history(&self, account_id: Option<&AccountId>, limit: usize) -> Vec<TriggeredAlert> {
        let history = self.history.lock();
        history
            .iter()
            .rev()
            .filter(|t| account_id.map_or(true, |id| &t.account_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Evaluate every active rule bound to `sample.account_id` against it,
    /// in rule insertion order, dispatching each trigger to its channel sink.
    pub async fn evaluate(&self, sample: &Sample) -> Vec<TriggeredAlert> {
        let order = self.rule_order.lock().clone();
        let mut triggered = Vec::new();

        for rule_id in order {
            let Some(mut rule) = self.rules.get_mut(&rule_id).map(|e| e.value().clone()) else {
                continue;
            };
            if !rule.active || rule.account_id != sample.account_id {
                continue;
            }
            let Some(actual) = path::resolve_numeric(sample, &rule.metric) else {
                continue;
            };
            if !rule.op.compare(actual, rule.threshold) {
                continue;
            }

            let fired_at = self.clock.now();
            let alert = TriggeredAlert {
                id: uuid::Uuid::new_v4().to_string(),
                rule_id: rule.id.clone(),
                account_id: rule.account_id.clone(),
                metric: rule.metric.clone(),
                op: rule.op,
                threshold: rule.threshold,
                actual_value: actual,
                sample_at: sample.observed_at,
                fired_at,
            };

            rule.last_triggered_at = Some(sample.observed_at);
            self.rules.insert(rule.id.clone(), rule.clone());
            if let Err(e) = self.store.upsert(&rule).await {
                warn!(rule_id = %rule.id, error = %e, "failed to persist rule after trigger");
            }

            if let Err(e) = self.router.dispatch(&rule, &alert).await {
                warn!(rule_id = %rule.id, error = %e, "notification sink failed, trigger still recorded");
            }

            self.history.lock().push(alert.clone());
            triggered.push(alert);
        }

        triggered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::rule::{Channel, Op, Window};
    use crate::domain::Engagement;
    use crate::storage::InMemoryAlertStore;
    use chrono::Utc;

    fn rule(id: &str, account_id: &str, threshold: f64) -> AlertRule {
        AlertRule {
            id: id.into(),
            account_id: account_id.into(),
            metric: "followers".into(),
            op: Op::Gt,
            threshold,
            window: Window::OneDay,
            channel: Channel::Log,
            channel_config: serde_json::Value::Null,
            description: "followers crossed threshold".into(),
            active: true,
            last_triggered_at: None,
        }
    }

    fn sample(account_id: &str, followers: u64) -> Sample {
        Sample {
            account_id: account_id.into(),
            observed_at: Utc::now(),
            followers,
            following: 0,
            posts: 0,
            engagement: Engagement::default(),
            source: Sample::SOURCE_SCRAPER.into(),
            previous_ref: None,
        }
    }

    fn engine() -> AlertEngine {
        AlertEngine::new(
            Arc::new(InMemoryAlertStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            ChannelRouter::with_log_only(),
        )
    }

    #[tokio::test]
    async fn fires_once_per_matching_sample_with_no_dedup() {
        let engine = engine();
        engine.add(rule("r1", "a1", 150.0)).await.unwrap();

        let first = engine.evaluate(&sample("a1", 160)).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].actual_value, 160.0);

        let second = engine.evaluate(&sample("a1", 160)).await;
        assert_eq!(second.len(), 1, "identical sample fires again, no dedup (spec §8 scenario 3)");
    }

    #[tokio::test]
    async fn missing_metric_path_does_not_trigger() {
        let engine = engine();
        let mut bad = rule("r1", "a1", 1.0);
        bad.metric = "engagement.avg_shares".into();
        engine.add(bad).await.unwrap();

        let triggered = engine.evaluate(&sample("a1", 160)).await;
        assert!(triggered.is_empty());
    }

    #[tokio::test]
    async fn triggers_are_emitted_in_rule_insertion_order() {
        let engine = engine();
        engine.add(rule("r2", "a1", 1.0)).await.unwrap();
        engine.add(rule("r1", "a1", 1.0)).await.unwrap();

        let triggered = engine.evaluate(&sample("a1", 160)).await;
        let ids: Vec<&str> = triggered.iter().map(|t| t.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r1"]);
    }
}
