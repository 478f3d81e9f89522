//! Channel dispatch for triggered alerts (spec §4.7). `log` is fully owned
//! by the engine; `email`/`webhook` hand off to external sinks (§6) that the
//! embedder supplies — the router falls back to a no-op stub for either one
//! that isn't configured, so a rule bound to an unwired channel still
//! records its trigger without erroring.

use crate::domain::rule::Channel;
use crate::domain::{AlertRule, TriggeredAlert};
use crate::error::EngineResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, rule: &AlertRule, alert: &TriggeredAlert) -> EngineResult<()>;
}

/// Writes a structured warn-level record. The only channel the engine fully
/// owns (spec §4.7: "log writes a structured warn-level record").
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, rule: &AlertRule, alert: &TriggeredAlert) -> EngineResult<()> {
        warn!(
            rule_id = %rule.id,
            account_id = %alert.account_id,
            metric = %alert.metric,
            op = ?alert.op,
            threshold = alert.threshold,
            actual_value = alert.actual_value,
            description = %rule.description,
            "alert triggered"
        );
        Ok(())
    }
}

/// Stands in for a channel with no sink wired up. Used as the default for
/// `email`/`webhook` until the embedder supplies a real implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSink {
    channel: &'static str,
}

#[async_trait]
impl NotificationSink for UnconfiguredSink {
    async fn notify(&self, rule: &AlertRule, _alert: &TriggeredAlert) -> EngineResult<()> {
        warn!(rule_id = %rule.id, channel = self.channel, "no sink configured for this channel, trigger recorded but not delivered");
        Ok(())
    }
}

/// Routes a triggered alert to the sink matching its rule's channel.
pub struct ChannelRouter {
    log: Arc<dyn NotificationSink>,
    email: Arc<dyn NotificationSink>,
    webhook: Arc<dyn NotificationSink>,
}

impl ChannelRouter {
    pub fn new(
        log: Arc<dyn NotificationSink>,
        email: Arc<dyn NotificationSink>,
        webhook: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { log, email, webhook }
    }

    /// `log` wired to the real sink; `email`/`webhook` unconfigured. The
    /// common case until an embedder supplies external sinks.
    pub fn with_log_only() -> Self {
        Self {
            log: Arc::new(LogSink),
            email: Arc::new(UnconfiguredSink { channel: "email" }),
            webhook: Arc::new(UnconfiguredSink { channel: "webhook" }),
        }
    }

    pub async fn dispatch(&self, rule: &AlertRule, alert: &TriggeredAlert) -> EngineResult<()> {
        let sink = match rule.channel {
            Channel::Log => &self.log,
            Channel::Email => &self.email,
            Channel::Webhook => &self.webhook,
        };
        sink.notify(rule, alert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{Op, Window};
    use chrono::Utc;

    fn rule(channel: Channel) -> AlertRule {
        AlertRule {
            id: "r1".into(),
            account_id: "a1".into(),
            metric: "followers".into(),
            op: Op::Gt,
            threshold: 100.0,
            window: Window::OneDay,
            channel,
            channel_config: serde_json::Value::Null,
            description: "test".into(),
            active: true,
            last_triggered_at: None,
        }
    }

    fn alert() -> TriggeredAlert {
        TriggeredAlert {
            id: "t1".into(),
            rule_id: "r1".into(),
            account_id: "a1".into(),
            metric: "followers".into(),
            op: Op::Gt,
            threshold: 100.0,
            actual_value: 160.0,
            sample_at: Utc::now(),
            fired_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unconfigured_channels_do_not_error() {
        let router = ChannelRouter::with_log_only();
        router.dispatch(&rule(Channel::Email), &alert()).await.unwrap();
        router.dispatch(&rule(Channel::Webhook), &alert()).await.unwrap();
        router.dispatch(&rule(Channel::Log), &alert()).await.unwrap();
    }
}
