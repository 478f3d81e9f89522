//! The Proxy Pool (spec §4.1): a health-tracked set of upstream proxies,
//! accessed exclusively through [`ProxyPool::with_proxy`], which enforces
//! per-proxy FIFO throttling, usage-based cool-down, and periodic health
//! checks.

mod classify;

use crate::clock::Clock;
use crate::domain::ProxyRecord;
use crate::error::{EngineError, EngineResult};
use crate::random::RandomSource;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub max_usage_per_proxy: u64,
    pub cooling_period: Duration,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    pub health_check_url: String,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(3),
            max_interval: Duration::from_secs(5),
            max_usage_per_proxy: 100,
            cooling_period: Duration::from_secs(600),
            health_check_interval: Duration::from_secs(300),
            health_check_timeout: Duration::from_secs(10),
            health_check_url: "https://www.google.com/generate_204".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ProxyPoolStatus {
    pub total: usize,
    pub available: usize,
    pub cooling: usize,
}

/// A set of proxies plus the scheduling state `with_proxy` needs: health,
/// per-proxy throttle locks, and the background recheck loops.
pub struct ProxyPool {
    config: ProxyPoolConfig,
    proxies: RwLock<Vec<ProxyRecord>>,
    throttles: DashMap<String, Arc<AsyncMutex<()>>>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl ProxyPool {
    pub fn new(
        config: ProxyPoolConfig,
        proxies: Vec<ProxyRecord>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.health_check_timeout)
            .build()
            .unwrap_or_default();
        let pool = Arc::new(Self {
            config,
            proxies: RwLock::new(proxies),
            throttles: DashMap::new(),
            client,
            clock,
            random,
        });
        pool.spawn_periodic_health_check();
        pool.spawn_cooldown_watch();
        pool
    }

    fn spawn_periodic_health_check(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(pool.config.health_check_interval).await;
                pool.check_all().await;
            }
        });
    }

    /// Every minute: recheck unhealthy proxies (spec §4.1 "scheduled for
    /// recheck one minute later") and release cooled-down proxies whose
    /// health is no longer stale.
    fn spawn_cooldown_watch(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                pool.recheck_unhealthy().await;
                pool.release_expired_cooldowns().await;
            }
        });
    }

    pub fn add_proxy(&self, proxy: ProxyRecord) {
        self.proxies.write().push(proxy);
    }

    pub fn remove_proxy(&self, id: &str) {
        self.proxies.write().retain(|p| p.id != id);
        self.throttles.remove(id);
    }

    /// A point-in-time copy of every proxy record, for persistence on
    /// shutdown (spec §5 "persists proxy state").
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.proxies.read().clone()
    }

    pub fn status(&self) -> ProxyPoolStatus {
        let now = self.clock.now();
        let proxies = self.proxies.read();
        let cooling = proxies.iter().filter(|p| p.cooling_until.map_or(false, |t| t > now)).count();
        let available = proxies.iter().filter(|p| self.is_available(p, now)).count();
        ProxyPoolStatus {
            total: proxies.len(),
            available,
            cooling,
        }
    }

    fn is_available(&self, proxy: &ProxyRecord, now: chrono::DateTime<Utc>) -> bool {
        proxy.healthy && proxy.cooling_until.map_or(true, |t| t <= now)
    }

    /// Minimum `usage_count`, ties broken by oldest `last_used_at` (never
    /// used sorts first).
    fn pick(&self) -> Option<ProxyRecord> {
        let now = self.clock.now();
        self.proxies
            .read()
            .iter()
            .filter(|p| self.is_available(p, now))
            .min_by(|a, b| {
                a.usage_count
                    .cmp(&b.usage_count)
                    .then_with(|| a.last_used_at.cmp(&b.last_used_at))
            })
            .cloned()
    }

    fn throttle_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.throttles
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .value(),
        )
    }

    /// Run `f` against a suitable proxy under the pool's throttling
    /// discipline. See module docs and spec §4.1.
    pub async fn with_proxy<F, Fut, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(ProxyRecord) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let proxy = match self.pick() {
            Some(p) => p,
            None => {
                warn!("no proxy available, running emergency health check");
                self.check_all().await;
                self.pick().ok_or(EngineError::NoProxyAvailable)?
            }
        };

        let throttle = self.throttle_for(&proxy.id);
        let _permit = throttle.lock().await;

        let delay = self.random.duration_in(self.config.min_interval, self.config.max_interval);
        tokio::time::sleep(delay).await;

        self.mark_used(&proxy.id);
        let result = f(proxy.clone()).await;

        if let Err(e) = &result {
            if classify::is_proxy_signal(&e.to_string()) {
                self.mark_unhealthy(&proxy.id, e.to_string());
            }
        }

        result
    }

    fn mark_used(&self, id: &str) {
        let now = self.clock.now();
        let mut proxies = self.proxies.write();
        if let Some(p) = proxies.iter_mut().find(|p| p.id == id) {
            p.usage_count += 1;
            p.last_used_at = Some(now);
            if p.usage_count >= self.config.max_usage_per_proxy {
                p.cooling_until = Some(now + self.config.cooling_period);
                info!(proxy = %p.log_id(), "proxy reached usage cap, cooling down");
            }
        }
    }

    fn mark_unhealthy(&self, id: &str, error: String) {
        let mut proxies = self.proxies.write();
        if let Some(p) = proxies.iter_mut().find(|p| p.id == id) {
            p.healthy = false;
            p.last_error = Some(error);
            warn!(proxy = %p.log_id(), "marked unhealthy after transport error");
        }
    }

    async fn check_one(&self, mut proxy: ProxyRecord) -> ProxyRecord {
        let proxy_url = match reqwest::Proxy::all(proxy.url()) {
            Ok(p) => p,
            Err(e) => {
                proxy.healthy = false;
                proxy.last_error = Some(e.to_string());
                proxy.last_check_at = Some(self.clock.now());
                return proxy;
            }
        };
        let client = reqwest::Client::builder()
            .timeout(self.config.health_check_timeout)
            .proxy(proxy_url)
            .build();
        let start = std::time::Instant::now();
        match client {
            Ok(client) => match client.head(&self.config.health_check_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    proxy.healthy = true;
                    proxy.response_time_ms = Some(start.elapsed().as_millis() as u64);
                    proxy.last_error = None;
                }
                Ok(resp) => {
                    proxy.healthy = false;
                    proxy.last_error = Some(format!("status {}", resp.status()));
                }
                Err(e) => {
                    proxy.healthy = false;
                    proxy.last_error = Some(e.to_string());
                }
            },
            Err(e) => {
                proxy.healthy = false;
                proxy.last_error = Some(e.to_string());
            }
        }
        proxy.last_check_at = Some(self.clock.now());
        proxy
    }

    async fn check_all(&self) {
        let snapshot = self.proxies.read().clone();
        let checked = futures::future::join_all(snapshot.into_iter().map(|p| self.check_one(p))).await;
        let mut proxies = self.proxies.write();
        for updated in checked {
            if let Some(p) = proxies.iter_mut().find(|p| p.id == updated.id) {
                *p = updated;
            }
        }
        info!(total = proxies.len(), "health check sweep complete");
    }

    async fn recheck_unhealthy(&self) {
        let unhealthy: Vec<ProxyRecord> = self.proxies.read().iter().filter(|p| !p.healthy).cloned().collect();
        if unhealthy.is_empty() {
            return;
        }
        let checked = futures::future::join_all(unhealthy.into_iter().map(|p| self.check_one(p))).await;
        let mut proxies = self.proxies.write();
        for updated in checked {
            if let Some(p) = proxies.iter_mut().find(|p| p.id == updated.id) {
                *p = updated;
            }
        }
    }

    /// Proxies whose cool-down has elapsed rejoin the available set; ones
    /// whose last health check is stale are rechecked first (spec §4.1).
    async fn release_expired_cooldowns(&self) {
        let now = self.clock.now();
        let due: Vec<ProxyRecord> = self
            .proxies
            .read()
            .iter()
            .filter(|p| p.cooling_until.map_or(false, |t| t <= now))
            .cloned()
            .collect();
        if due.is_empty() {
            return;
        }

        let (stale, fresh): (Vec<_>, Vec<_>) = due.into_iter().partition(|p| {
            p.last_check_at.map_or(true, |t| now - t > self.config.health_check_interval)
        });

        {
            let mut proxies = self.proxies.write();
            for p in proxies.iter_mut() {
                if fresh.iter().any(|f| f.id == p.id) {
                    p.cooling_until = None;
                    p.usage_count = 0;
                }
            }
        }

        if stale.is_empty() {
            return;
        }
        let checked = futures::future::join_all(stale.into_iter().map(|p| self.check_one(p))).await;
        let mut proxies = self.proxies.write();
        for updated in checked {
            if let Some(p) = proxies.iter_mut().find(|p| p.id == updated.id) {
                p.healthy = updated.healthy;
                p.last_error = updated.last_error;
                p.response_time_ms = updated.response_time_ms;
                p.last_check_at = updated.last_check_at;
                p.cooling_until = None;
                p.usage_count = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::proxy::ProxyProtocol;
    use crate::random::FixedRandom;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn proxy(host: &str) -> ProxyRecord {
        ProxyRecord::new(host.to_string(), 8080, ProxyProtocol::Http, None)
    }

    #[tokio::test]
    async fn with_proxy_runs_against_the_least_used_proxy() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let random = Arc::new(FixedRandom(Duration::from_millis(1)));
        let mut low_usage = proxy("a");
        low_usage.usage_count = 0;
        let mut high_usage = proxy("b");
        high_usage.usage_count = 50;
        let pool = ProxyPool::new(
            ProxyPoolConfig {
                min_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(1),
                ..Default::default()
            },
            vec![high_usage, low_usage],
            clock,
            random,
        );
        let used: Arc<std::sync::Mutex<Option<String>>> = Arc::new(std::sync::Mutex::new(None));
        let used_clone = Arc::clone(&used);
        pool.with_proxy(move |p| async move {
            *used_clone.lock().unwrap() = Some(p.host.clone());
            Ok::<_, EngineError>(())
        })
        .await
        .unwrap();
        assert_eq!(used.lock().unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn no_proxy_available_when_pool_is_empty() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let random = Arc::new(FixedRandom(Duration::from_millis(1)));
        let pool = ProxyPool::new(ProxyPoolConfig::default(), vec![], clock, random);
        let result = pool.with_proxy(|_| async { Ok::<_, EngineError>(()) }).await;
        assert!(matches!(result, Err(EngineError::NoProxyAvailable)));
    }

    #[tokio::test]
    async fn concurrent_calls_on_the_same_proxy_never_overlap() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let random = Arc::new(FixedRandom(Duration::from_millis(1)));
        let pool = ProxyPool::new(
            ProxyPoolConfig {
                min_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(1),
                ..Default::default()
            },
            vec![proxy("solo")],
            clock,
            random,
        );
        let overlapping = Arc::new(AtomicUsize::new(0));
        let max_overlap = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let pool = Arc::clone(&pool);
            let overlapping = Arc::clone(&overlapping);
            let max_overlap = Arc::clone(&max_overlap);
            handles.push(tokio::spawn(async move {
                pool.with_proxy(|_| async move {
                    let now = overlapping.fetch_add(1, Ordering::SeqCst) + 1;
                    max_overlap.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    overlapping.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, EngineError>(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(max_overlap.load(Ordering::SeqCst), 1);
    }
}
