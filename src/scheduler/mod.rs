//! The Priority Scheduler (spec §4.5): one timer per active account, a
//! bounded worker pool, and a ready queue ordered by `(priority desc,
//! queued_at asc)`.

mod cadence;

use crate::alerts::AlertEngine;
use crate::clock::Clock;
use crate::domain::account::{Account, AccountChanged, AccountError, AccountId, ChangeKind, Priority};
use crate::error::EngineError;
use crate::fetcher::Fetcher;
use crate::metrics::MetricsSink;
use crate::random::RandomSource;
use crate::registry::AccountRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_workers: usize,
    pub jitter_pct: f64,
    pub min_interval: Duration,
    pub no_proxy_retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 4,
            jitter_pct: 0.08,
            min_interval: Duration::from_secs(3),
            no_proxy_retry_delay: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStatus {
    Running,
    Queued,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub queue_size: usize,
    pub running: Vec<AccountId>,
    pub scheduled: usize,
}

struct QueueEntry {
    account_id: AccountId,
    priority: Priority,
    queued_at: DateTime<Utc>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.account_id == other.account_id
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.queued_at.cmp(&self.queued_at))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<AccountRegistry>,
    metrics: Arc<dyn MetricsSink>,
    alerts: Arc<AlertEngine>,
    fetcher: Arc<Fetcher>,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
    queue: Mutex<BinaryHeap<QueueEntry>>,
    manual_queue: Mutex<VecDeque<AccountId>>,
    queued_ids: DashMap<AccountId, ()>,
    timers: DashMap<AccountId, CancellationToken>,
    running: DashMap<AccountId, ()>,
    semaphore: Arc<Semaphore>,
    notify: Notify,
    cancel: CancellationToken,
    paused: AtomicBool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<AccountRegistry>,
        metrics: Arc<dyn MetricsSink>,
        alerts: Arc<AlertEngine>,
        fetcher: Arc<Fetcher>,
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_workers));
        Arc::new(Self {
            config,
            registry,
            metrics,
            alerts,
            fetcher,
            random,
            clock,
            queue: Mutex::new(BinaryHeap::new()),
            manual_queue: Mutex::new(VecDeque::new()),
            queued_ids: DashMap::new(),
            timers: DashMap::new(),
            running: DashMap::new(),
            semaphore,
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            paused: AtomicBool::new(false),
        })
    }

    /// Arm every active account's timer and start the dispatcher and
    /// account-change listener tasks.
    pub fn start(self: &Arc<Self>) {
        self.schedule_all();
        tokio::spawn(Arc::clone(self).dispatcher_loop());
        tokio::spawn(Arc::clone(self).change_listener_loop());
        info!("scheduler started");
    }

    /// Cancel every timer, drop all pending queue entries, and stop
    /// accepting new dispatches. In-flight fetches observe cancellation at
    /// their next suspension point (spec §5).
    pub fn stop(&self) {
        self.cancel.cancel();
        for entry in self.timers.iter() {
            entry.value().cancel();
        }
        self.timers.clear();
        self.queue.lock().clear();
        self.manual_queue.lock().clear();
        self.queued_ids.clear();
    }

    pub fn pause(&self) {
        self.paused.store(true, AtomicOrdering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, AtomicOrdering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn status(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            queue_size: self.queue.lock().len() + self.manual_queue.lock().len(),
            running: self.running.iter().map(|e| e.key().clone()).collect(),
            scheduled: self.timers.len(),
        }
    }

    pub fn schedule_all(self: &Arc<Self>) {
        for account in self.registry.list(&Default::default()) {
            if account.active {
                self.schedule_account(&account);
            }
        }
    }

    /// Arm (or re-arm) `account`'s timer per the cadence table and jitter.
    /// A no-op if the account is currently running or already has a queue
    /// entry — the xor invariant (spec §8 invariant 1) means only one of
    /// {timer, queue entry, running worker} may exist at a time, and the
    /// other two states already imply a future re-arm once they resolve.
    pub fn schedule_account(self: &Arc<Self>, account: &Account) {
        if self.running.contains_key(&account.id) || self.queued_ids.contains_key(&account.id) {
            return;
        }

        let now = self.clock.now();
        let base = cadence::base_interval(account.priority);
        let raw_delay = match account.last_scraped_at {
            Some(last) => {
                let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                base.saturating_sub(elapsed)
            }
            None => self.random.duration_in(Duration::ZERO, Duration::from_secs(10)),
        };
        let jittered = cadence::jitter(raw_delay, self.config.jitter_pct, &*self.random);
        let floor = self.random.duration_in(Duration::ZERO, self.config.min_interval);
        let delay = jittered.max(floor);

        self.arm_timer(account.id.clone(), delay);
    }

    fn arm_timer(self: &Arc<Self>, account_id: AccountId, delay: Duration) {
        if let Some((_, token)) = self.timers.remove(&account_id) {
            token.cancel();
        }
        let token = CancellationToken::new();
        self.timers.insert(account_id.clone(), token.clone());

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    scheduler.timers.remove(&account_id);
                    scheduler.enqueue(account_id);
                }
                _ = token.cancelled() => {}
            }
        });
    }

    fn enqueue(&self, account_id: AccountId) {
        let Some(account) = self.registry.get(&account_id) else {
            return;
        };
        if !account.active {
            return;
        }
        self.queued_ids.insert(account_id.clone(), ());
        self.queue.lock().push(QueueEntry {
            account_id,
            priority: account.priority,
            queued_at: self.clock.now(),
        });
        self.notify.notify_one();
    }

    /// Cancel `account_id`'s timer and drop any queue entry for it, leaving
    /// neither armed (used before rescheduling on a priority/active change,
    /// and before a manual `prioritize`).
    fn unschedule(&self, account_id: &AccountId) {
        if let Some((_, token)) = self.timers.remove(account_id) {
            token.cancel();
        }
        {
            let mut queue = self.queue.lock();
            let remaining: Vec<QueueEntry> = queue.drain().filter(|e| &e.account_id != account_id).collect();
            *queue = remaining.into_iter().collect();
        }
        self.manual_queue.lock().retain(|id| id != account_id);
        self.queued_ids.remove(account_id);
    }

    /// Cancel the timer, drop any queue entry, and insert at the head of
    /// the ready queue. If already running, reports that back without
    /// duplicating work (spec §4.5 "Manual prioritization").
    pub fn prioritize(self: &Arc<Self>, account_id: &AccountId) -> SchedulerStatus {
        if self.running.contains_key(account_id) {
            return SchedulerStatus::Running;
        }
        self.unschedule(account_id);
        self.manual_queue.lock().push_back(account_id.clone());
        self.queued_ids.insert(account_id.clone(), ());
        self.notify.notify_one();
        SchedulerStatus::Queued
    }

    fn pop_next(&self) -> Option<AccountId> {
        if let Some(id) = self.manual_queue.lock().pop_front() {
            return Some(id);
        }
        self.queue.lock().pop().map(|e| e.account_id)
    }

    async fn dispatcher_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.notify.notified() => {}
            }
            loop {
                if self.cancel.is_cancelled() {
                    return;
                }
                if self.paused.load(AtomicOrdering::SeqCst) {
                    break;
                }
                let Some(account_id) = self.pop_next() else {
                    break;
                };
                let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                self.queued_ids.remove(&account_id);
                self.running.insert(account_id.clone(), ());
                let worker = Arc::clone(&self);
                tokio::spawn(async move { worker.run_worker(account_id, permit).await });
            }
        }
    }

    async fn run_worker(self: Arc<Self>, account_id: AccountId, _permit: OwnedSemaphorePermit) {
        let Some(account) = self.registry.get(&account_id) else {
            self.running.remove(&account_id);
            return;
        };

        let previous = self
            .metrics
            .latest_for(&account_id)
            .await
            .ok()
            .flatten()
            .map(|s| s.observed_at);
        let result = self.fetcher.fetch(&account, previous, &self.cancel).await;
        let no_proxy_available = matches!(result, Err(EngineError::NoProxyAvailable));

        match result {
            Ok(sample) => {
                if let Err(e) = self.metrics.put(sample.clone()).await {
                    warn!(account_id = %account_id, error = %e, "failed to store sample");
                }
                self.alerts.evaluate(&sample).await;
                if let Err(e) = self.registry.record_scrape_result(&account_id, Some(sample.observed_at), None).await {
                    warn!(account_id = %account_id, error = %e, "failed to record scrape result");
                }
            }
            Err(EngineError::Cancelled) => {}
            Err(e) => {
                let message = e.to_string();
                if e.should_log_as_error() {
                    error!(account_id = %account_id, error = %message, "fetch failed");
                } else {
                    debug!(account_id = %account_id, error = %message, "fetch failed");
                }
                let account_error = AccountError { message, at: self.clock.now() };
                if let Err(e) = self.registry.record_scrape_result(&account_id, None, Some(account_error)).await {
                    warn!(account_id = %account_id, error = %e, "failed to record scrape result");
                }
            }
        }

        self.running.remove(&account_id);

        let Some(account) = self.registry.get(&account_id) else {
            return;
        };
        if !account.active {
            return;
        }
        if no_proxy_available {
            self.arm_timer(account_id, self.config.no_proxy_retry_delay);
        } else {
            self.schedule_account(&account);
        }
    }

    async fn change_listener_loop(self: Arc<Self>) {
        let mut changes = self.registry.subscribe();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = changes.recv() => {
                    match event {
                        Ok(changed) => self.handle_account_changed(changed),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    /// Changing priority or active re-evaluates scheduling immediately
    /// (spec §3): unschedule first so a stale timer never wins a race
    /// against the freshly recomputed cadence.
    fn handle_account_changed(self: &Arc<Self>, changed: AccountChanged) {
        match changed.kind {
            ChangeKind::Deleted | ChangeKind::Deactivated => self.unschedule(&changed.account_id),
            ChangeKind::Created | ChangeKind::Updated | ChangeKind::Activated => {
                if let Some(account) = self.registry.get(&changed.account_id) {
                    if account.active {
                        self.unschedule(&account.id);
                        self.schedule_account(&account);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser_pool::{BrowserPool, BrowserPoolConfig};
    use crate::clock::ManualClock;
    use crate::fetcher::{Fetcher, FetcherConfig};
    use crate::metrics::InMemoryMetricsStore;
    use crate::proxy_pool::{ProxyPool, ProxyPoolConfig};
    use crate::random::FixedRandom;
    use crate::storage::{InMemoryAccountStore, InMemoryAlertStore};
    use std::collections::HashSet;

    fn account(id: &str, priority: u8) -> Account {
        Account {
            id: id.into(),
            username: id.into(),
            display_name: id.into(),
            profile_url: format!("https://example.com/{id}"),
            priority: Priority::new(priority).unwrap(),
            active: true,
            tags: HashSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_scraped_at: None,
            last_error: None,
        }
    }

    fn scheduler(clock: Arc<ManualClock>) -> Arc<Scheduler> {
        let registry = Arc::new(AccountRegistry::new(Arc::new(InMemoryAccountStore::new()), clock.clone()));
        let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetricsStore::new());
        let alerts = Arc::new(AlertEngine::new(
            Arc::new(InMemoryAlertStore::new()),
            clock.clone(),
            crate::alerts::ChannelRouter::with_log_only(),
        ));
        let proxy_pool = ProxyPool::new(ProxyPoolConfig::default(), Vec::new(), clock.clone(), Arc::new(FixedRandom(Duration::ZERO)));
        let browser_pool = BrowserPool::new(BrowserPoolConfig::default(), clock.clone());
        let fetcher = Arc::new(Fetcher::new(FetcherConfig::default(), browser_pool, proxy_pool, clock.clone()));
        Scheduler::new(
            SchedulerConfig::default(),
            registry,
            metrics,
            alerts,
            fetcher,
            Arc::new(FixedRandom(Duration::ZERO)),
            clock,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_account_arms_exactly_one_timer_and_no_queue_entry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = scheduler(clock);
        let account = account("a1", 5);
        scheduler.schedule_account(&account);
        assert_eq!(scheduler.status().scheduled, 1);
        assert_eq!(scheduler.status().queue_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduling_an_already_queued_account_is_a_no_op() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = scheduler(clock);
        let account = account("a1", 5);
        scheduler.registry.add(account.clone()).await.unwrap();
        scheduler.enqueue(account.id.clone());
        assert_eq!(scheduler.status().queue_size, 1);
        scheduler.schedule_account(&account);
        assert_eq!(scheduler.status().scheduled, 0, "already-queued account must not also get a timer");
    }

    #[test]
    fn prioritize_returns_running_status_without_duplicating_a_running_account() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = scheduler(clock);
        scheduler.running.insert("a1".to_string(), ());
        let status = scheduler.prioritize(&"a1".to_string());
        assert_eq!(status, SchedulerStatus::Running);
        assert_eq!(scheduler.status().queue_size, 0);
    }

    #[test]
    fn prioritize_moves_an_account_to_the_front_of_the_manual_queue() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = scheduler(clock);
        scheduler.enqueue("low".to_string());
        let status = scheduler.prioritize(&"low".to_string());
        assert_eq!(status, SchedulerStatus::Queued);
        assert_eq!(scheduler.pop_next().as_deref(), Some("low"));
    }

    #[test]
    fn ready_queue_orders_by_priority_desc_then_queued_at_asc() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let scheduler = scheduler(clock.clone());
        let mut queue = scheduler.queue.lock();
        queue.push(QueueEntry { account_id: "low".into(), priority: Priority::new(1).unwrap(), queued_at: clock.now() });
        clock.advance(chrono::Duration::seconds(1));
        queue.push(QueueEntry { account_id: "high-later".into(), priority: Priority::new(5).unwrap(), queued_at: clock.now() });
        clock.advance(chrono::Duration::seconds(-10));
        queue.push(QueueEntry { account_id: "high-earlier".into(), priority: Priority::new(5).unwrap(), queued_at: clock.now() });
        drop(queue);

        assert_eq!(scheduler.pop_next().as_deref(), Some("high-earlier"));
        assert_eq!(scheduler.pop_next().as_deref(), Some("high-later"));
        assert_eq!(scheduler.pop_next().as_deref(), Some("low"));
    }
}
