//! The Orchestrator (spec §9 design note "global singletons"): a single
//! `Engine` value owning every pool and store, replacing the source's
//! module-level managers. A control-plane adapter (not defined here, spec
//! §6) drives its lifecycle methods.

use crate::alerts::{AlertEngine, ChannelRouter};
use crate::browser_pool::{BrowserPool, BrowserPoolConfig};
use crate::clock::Clock;
use crate::domain::account::AccountId;
use crate::domain::proxy::{ProxyFile, ProxyFileEntry};
use crate::domain::ProxyRecord;
use crate::error::EngineResult;
use crate::fetcher::{Fetcher, FetcherConfig};
use crate::metrics::MetricsSink;
use crate::proxy_pool::{ProxyPool, ProxyPoolConfig, ProxyPoolStatus};
use crate::random::RandomSource;
use crate::registry::AccountRegistry;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerSnapshot, SchedulerStatus};
use crate::storage::{AccountStore, AlertStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub proxies: ProxyPoolConfig,
    pub browsers: BrowserPoolConfig,
    pub fetcher: FetcherConfig,
    /// Where to persist the proxy set on `stop`, if anywhere (spec §6 wire
    /// format). `None` means proxies are not backed by a file.
    pub proxy_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BrowserStatus {
    pub running: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub initialized: bool,
    pub running: bool,
    pub accounts: usize,
    pub scheduler: SchedulerSnapshot,
    pub browsers: BrowserStatus,
    pub proxies: ProxyPoolStatus,
}

/// Owns every pool, store handle and background task the engine needs.
/// Constructed once at startup; `initialize` loads durable state, `start`
/// arms the scheduler, `stop` tears everything down (spec §5).
pub struct Engine {
    config: EngineConfig,
    registry: Arc<AccountRegistry>,
    proxy_pool: Arc<ProxyPool>,
    browser_pool: Arc<BrowserPool>,
    scheduler: Arc<Scheduler>,
    alerts: Arc<AlertEngine>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    initialized: AtomicBool,
    running: AtomicBool,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        account_store: Arc<dyn AccountStore>,
        alert_store: Arc<dyn AlertStore>,
        metrics: Arc<dyn MetricsSink>,
        proxies: Vec<ProxyRecord>,
        notifications: ChannelRouter,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let registry = Arc::new(AccountRegistry::new(account_store, clock.clone()));
        let proxy_pool = ProxyPool::new(config.proxies.clone(), proxies, clock.clone(), random.clone());
        let browser_pool = BrowserPool::new(config.browsers.clone(), clock.clone());
        let fetcher = Arc::new(Fetcher::new(
            config.fetcher.clone(),
            Arc::clone(&browser_pool),
            Arc::clone(&proxy_pool),
            clock.clone(),
        ));
        let alerts = Arc::new(AlertEngine::new(alert_store, clock.clone(), notifications));
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            Arc::clone(&alerts),
            fetcher,
            random,
            clock.clone(),
        );

        Self {
            config,
            registry,
            proxy_pool,
            browser_pool,
            scheduler,
            alerts,
            metrics,
            clock,
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Load durable accounts and alert rules into memory. Call once before
    /// `start`.
    pub async fn initialize(&self) -> EngineResult<()> {
        self.registry.load().await?;
        self.alerts.load().await?;
        self.initialized.store(true, Ordering::SeqCst);
        info!("engine initialized");
        Ok(())
    }

    /// Arm every active account's timer and start the dispatcher.
    pub fn start(&self) {
        self.scheduler.start();
        self.running.store(true, Ordering::SeqCst);
        info!("engine started");
    }

    /// Cancel all timers, drain the ready queue, let in-flight fetches
    /// observe cancellation at their next suspension point, close every
    /// browser, and persist proxy state (spec §5).
    pub async fn stop(&self) {
        self.scheduler.stop();
        self.browser_pool.shutdown().await;
        self.persist_proxies().await;
        self.running.store(false, Ordering::SeqCst);
        info!("engine stopped");
    }

    /// Leave in-flight work alone but stop new dispatches.
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    /// Maps to `Scheduler.prioritize` (spec §6 `POST scrapeNow`).
    pub fn scrape_now(&self, account_id: &AccountId) -> SchedulerStatus {
        self.scheduler.prioritize(account_id)
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            initialized: self.initialized.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
            accounts: self.registry.list(&Default::default()).len(),
            scheduler: self.scheduler.status(),
            browsers: BrowserStatus {
                running: self.browser_pool.running_count().await,
                max: self.config.browsers.max_browsers,
            },
            proxies: self.proxy_pool.status(),
        }
    }

    async fn persist_proxies(&self) {
        let Some(path) = &self.config.proxy_file else {
            return;
        };
        let entries: Vec<ProxyFileEntry> = self
            .proxy_pool
            .snapshot()
            .into_iter()
            .map(|p| ProxyFileEntry {
                host: p.host,
                port: p.port,
                protocol: p.protocol,
                auth: p.auth,
            })
            .collect();
        let file = ProxyFile {
            proxies: entries,
            last_updated: self.clock.now(),
        };
        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    warn!(path = %path.display(), error = %e, "failed to persist proxy state");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize proxy state"),
        }
    }

    pub fn registry(&self) -> &Arc<AccountRegistry> {
        &self.registry
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn proxy_pool(&self) -> &Arc<ProxyPool> {
        &self.proxy_pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::account::{Account, Priority};
    use crate::random::FixedRandom;
    use crate::storage::{InMemoryAccountStore, InMemoryAlertStore};
    use chrono::Utc;
    use std::collections::HashSet;
    use std::time::Duration;

    fn engine() -> Engine {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let random: Arc<dyn RandomSource> = Arc::new(FixedRandom(Duration::ZERO));
        let metrics: Arc<dyn MetricsSink> = Arc::new(crate::metrics::InMemoryMetricsStore::new());
        Engine::new(
            EngineConfig::default(),
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryAlertStore::new()),
            metrics,
            Vec::new(),
            ChannelRouter::with_log_only(),
            clock,
            random,
        )
    }

    #[tokio::test]
    async fn status_reports_uninitialized_before_initialize_is_called() {
        let engine = engine();
        assert!(!engine.status().await.initialized);
        assert!(!engine.status().await.running);
    }

    #[tokio::test]
    async fn initialize_then_start_flips_both_flags() {
        let engine = engine();
        engine.initialize().await.unwrap();
        engine.start();
        let status = engine.status().await;
        assert!(status.initialized);
        assert!(status.running);
        engine.stop().await;
        assert!(!engine.status().await.running);
    }

    #[tokio::test]
    async fn stop_persists_the_proxy_pool_to_the_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.json");

        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let random: Arc<dyn RandomSource> = Arc::new(FixedRandom(Duration::ZERO));
        let metrics: Arc<dyn MetricsSink> = Arc::new(crate::metrics::InMemoryMetricsStore::new());
        let proxy = ProxyRecord::new("10.0.0.1".into(), 8080, crate::domain::ProxyProtocol::Http, None);
        let engine = Engine::new(
            EngineConfig {
                proxy_file: Some(path.clone()),
                ..Default::default()
            },
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryAlertStore::new()),
            metrics,
            vec![proxy],
            ChannelRouter::with_log_only(),
            clock,
            random,
        );

        engine.initialize().await.unwrap();
        engine.start();
        engine.stop().await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let file: ProxyFile = serde_json::from_str(&contents).unwrap();
        assert_eq!(file.proxies.len(), 1);
        assert_eq!(file.proxies[0].host, "10.0.0.1");
    }

    #[tokio::test]
    async fn status_counts_accounts_loaded_at_initialize() {
        let engine = engine();
        engine
            .registry()
            .add(Account {
                id: "a1".into(),
                username: "a1".into(),
                display_name: "a1".into(),
                profile_url: "https://example.com/a1".into(),
                priority: Priority::new(3).unwrap(),
                active: true,
                tags: HashSet::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_scraped_at: None,
                last_error: None,
            })
            .await
            .unwrap();
        engine.initialize().await.unwrap();
        assert_eq!(engine.status().await.accounts, 1);
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_scheduler_state() {
        let engine = engine();
        engine.initialize().await.unwrap();
        engine.start();
        engine.pause();
        engine.resume();
        engine.stop().await;
    }

    #[tokio::test]
    async fn scrape_now_queues_an_unscheduled_account() {
        let engine = engine();
        engine.initialize().await.unwrap();
        engine
            .registry()
            .add(Account {
                id: "a1".into(),
                username: "a1".into(),
                display_name: "a1".into(),
                profile_url: "https://example.com/a1".into(),
                priority: Priority::new(3).unwrap(),
                active: true,
                tags: HashSet::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_scraped_at: None,
                last_error: None,
            })
            .await
            .unwrap();
        let status = engine.scrape_now(&"a1".to_string());
        assert_eq!(status, SchedulerStatus::Queued);
    }
}
