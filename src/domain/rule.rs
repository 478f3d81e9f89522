//! Alert rules and the immutable trigger history they produce.

use super::account::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comparison operator an [`AlertRule`] applies to a resolved metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Ne,
}

impl Op {
    /// `actual <op> threshold`. Floating comparisons use exact equality for
    /// `Eq`/`Ne` per spec §8 ("fires iff actual == T"); callers resolve
    /// counts (integers) through `f64` so this is exact for any value a
    /// `Sample` can actually hold.
    pub fn compare(self, actual: f64, threshold: f64) -> bool {
        match self {
            Op::Gt => actual > threshold,
            Op::Lt => actual < threshold,
            Op::Gte => actual >= threshold,
            Op::Lte => actual <= threshold,
            Op::Eq => actual == threshold,
            Op::Ne => actual != threshold,
        }
    }
}

/// Informational window label carried on a rule; the engine does not use it
/// to bound evaluation (each Sample is evaluated once, at ingest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

/// Delivery channel for a triggered alert. `Email`/`Webhook` hand off to
/// external sinks (spec §6/§7); only `Log` is fully owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Log,
    Email,
    Webhook,
}

/// A declarative alert predicate bound to one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub account_id: AccountId,
    /// Dotted path into a `Sample`, e.g. `followers`, `engagement.avg_likes`.
    pub metric: String,
    pub op: Op,
    pub threshold: f64,
    pub window: Window,
    pub channel: Channel,
    pub channel_config: serde_json::Value,
    pub description: String,
    pub active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Immutable record that a rule fired against a specific Sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub id: String,
    pub rule_id: String,
    pub account_id: AccountId,
    pub metric: String,
    pub op: Op,
    pub threshold: f64,
    pub actual_value: f64,
    pub sample_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
}

/// Filter applied by `AlertEngine::list`/`history`.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub account_id: Option<AccountId>,
    pub active: Option<bool>,
    pub channel: Option<Channel>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &AlertRule) -> bool {
        if let Some(account_id) = &self.account_id {
            if &rule.account_id != account_id {
                return false;
            }
        }
        if let Some(active) = self.active {
            if rule.active != active {
                return false;
            }
        }
        if let Some(channel) = self.channel {
            if rule.channel != channel {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_and_ne_are_logical_complements() {
        assert!(Op::Eq.compare(160.0, 160.0));
        assert!(!Op::Ne.compare(160.0, 160.0));
        assert!(!Op::Eq.compare(160.0, 161.0));
        assert!(Op::Ne.compare(160.0, 161.0));
    }

    #[test]
    fn gt_fires_strictly_above_threshold() {
        assert!(Op::Gt.compare(160.0, 150.0));
        assert!(!Op::Gt.compare(150.0, 150.0));
    }
}
