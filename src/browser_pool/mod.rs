//! The Browser Pool (spec §4.2): a bounded set of WebDriver sessions, each
//! bound to one proxy for its whole lifetime.
//!
//! Proxy affinity (design decision, `SPEC_FULL.md` §11.1): a browser's proxy
//! is part of its WebDriver capabilities and cannot change mid-session, so
//! `get_page` is keyed by `proxy_id` — it reuses a free page slot on a
//! browser already bound to that proxy, or launches a new browser bound to
//! it, while `max_browsers`/`max_pages_per_browser`/age/reset-count limits
//! are enforced across the whole pool regardless of which proxy a browser
//! is bound to.

mod classify;

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
pub use classify::is_disconnect_signal;
use fantoccini::wd::Capabilities;
use fantoccini::{Client, ClientBuilder, Locator};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    pub webdriver_url: String,
    pub max_browsers: usize,
    pub max_pages_per_browser: usize,
    pub max_browser_age: Duration,
    pub browser_reset_count: u32,
    pub navigation_timeout: Duration,
    pub viewport: (u32, u32),
    pub user_agent: String,
    pub block_resources: bool,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            max_browsers: 4,
            max_pages_per_browser: 3,
            max_browser_age: Duration::from_secs(30 * 60),
            browser_reset_count: 50,
            navigation_timeout: Duration::from_secs(30),
            viewport: (1280, 1024),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            block_resources: true,
        }
    }
}

struct Browser {
    id: u64,
    proxy_id: String,
    client: Client,
    created_at: chrono::DateTime<chrono::Utc>,
    pages_open: usize,
    total_page_uses: u32,
}

impl Browser {
    fn is_expired(&self, config: &BrowserPoolConfig, now: chrono::DateTime<chrono::Utc>) -> bool {
        let age = (now - self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age >= config.max_browser_age || self.total_page_uses >= config.browser_reset_count
    }

    fn has_capacity(&self, config: &BrowserPoolConfig) -> bool {
        self.pages_open < config.max_pages_per_browser
    }
}

/// A leased page. Drop it via [`BrowserPool::release_page`] when done; the
/// caller owns a full WebDriver client handle on the owning browser.
pub struct PageLease {
    pub browser_id: u64,
    pub client: Client,
}

pub struct BrowserPool {
    config: BrowserPoolConfig,
    browsers: Mutex<Vec<Browser>>,
    next_id: AtomicU64,
    waiters: Notify,
    clock: Arc<dyn Clock>,
}

impl BrowserPool {
    pub fn new(config: BrowserPoolConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            config,
            browsers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            waiters: Notify::new(),
            clock,
        })
    }

    pub async fn running_count(&self) -> usize {
        self.browsers.lock().await.len()
    }

    /// Acquire a page bound to `proxy_id`, waiting for a free slot if the
    /// pool is saturated. Cancellation-aware: returns `Cancelled` if
    /// `cancel` fires first.
    pub async fn get_page(&self, proxy_id: &str, cancel: &CancellationToken) -> EngineResult<PageLease> {
        loop {
            if let Some(lease) = self.try_acquire(proxy_id).await? {
                return Ok(lease);
            }
            tokio::select! {
                _ = self.waiters.notified() => continue,
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            }
        }
    }

    async fn try_acquire(&self, proxy_id: &str) -> EngineResult<Option<PageLease>> {
        let now = self.clock.now();
        let mut browsers = self.browsers.lock().await;

        browsers.retain(|b| !(b.pages_open == 0 && b.is_expired(&self.config, now)));

        if let Some(browser) = browsers
            .iter_mut()
            .find(|b| b.proxy_id == proxy_id && b.has_capacity(&self.config) && !b.is_expired(&self.config, now))
        {
            browser.pages_open += 1;
            browser.total_page_uses += 1;
            return Ok(Some(PageLease {
                browser_id: browser.id,
                client: browser.client.clone(),
            }));
        }

        if browsers.len() >= self.config.max_browsers {
            return Ok(None);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let client = self.launch(proxy_id).await?;
        let lease = PageLease {
            browser_id: id,
            client: client.clone(),
        };
        browsers.push(Browser {
            id,
            proxy_id: proxy_id.to_string(),
            client,
            created_at: now,
            pages_open: 1,
            total_page_uses: 1,
        });
        info!(proxy_id, browser_id = id, "launched browser");
        Ok(Some(lease))
    }

    async fn launch(&self, proxy_id: &str) -> EngineResult<Client> {
        let mut caps = Capabilities::new();
        let mut chrome_args = vec![
            format!("--window-size={},{}", self.config.viewport.0, self.config.viewport.1),
            format!("--user-agent={}", self.config.user_agent),
            format!("--proxy-server={proxy_id}"),
        ];
        if self.config.block_resources {
            chrome_args.push("--blink-settings=imagesEnabled=false".to_string());
        }
        caps.insert(
            "goog:chromeOptions".to_string(),
            serde_json::json!({ "args": chrome_args }),
        );

        ClientBuilder::native()
            .capabilities(caps)
            .connect(&self.config.webdriver_url)
            .await
            .map_err(|e| EngineError::Navigation(format!("failed to start browser session: {e}")))
    }

    /// Return a leased page. If the owning browser has no pages left and is
    /// expired by age or reset count, it is closed.
    pub async fn release_page(&self, browser_id: u64) {
        let now = self.clock.now();
        let mut to_close: Option<Client> = None;
        {
            let mut browsers = self.browsers.lock().await;
            if let Some(browser) = browsers.iter_mut().find(|b| b.id == browser_id) {
                browser.pages_open = browser.pages_open.saturating_sub(1);
                if browser.pages_open == 0 && browser.is_expired(&self.config, now) {
                    to_close = Some(browser.client.clone());
                    browsers.retain(|b| b.id != browser_id);
                }
            }
        }
        if let Some(client) = to_close {
            if let Err(e) = client.close().await {
                warn!(browser_id, error = %e, "error closing recycled browser");
            }
        }
        self.waiters.notify_waiters();
    }

    /// Remove a browser that reported itself disconnected mid-use (spec
    /// §4.2: "A disconnected browser is removed from the pool immediately").
    pub async fn remove_disconnected(&self, browser_id: u64) {
        let mut browsers = self.browsers.lock().await;
        browsers.retain(|b| b.id != browser_id);
        drop(browsers);
        self.waiters.notify_waiters();
    }

    /// Close every open browser. Called by the Orchestrator on `stop`.
    pub async fn shutdown(&self) {
        let browsers: Vec<Browser> = std::mem::take(&mut *self.browsers.lock().await);
        for browser in browsers {
            if let Err(e) = browser.client.close().await {
                warn!(browser_id = browser.id, error = %e, "error closing browser during shutdown");
            }
        }
    }
}

/// Navigate `client` to `url` and wait for the landed URL to still contain
/// `expected_username` (case-insensitive); used by the Fetcher to detect a
/// redirect indicating the handle no longer exists.
pub async fn goto_and_verify(
    client: &Client,
    url: &str,
    expected_username: &str,
    timeout: Duration,
) -> EngineResult<()> {
    tokio::time::timeout(timeout, client.goto(url))
        .await
        .map_err(|_| EngineError::Navigation(format!("navigation to {url} timed out")))?
        .map_err(|e| EngineError::Navigation(e.to_string()))?;

    let landed = client
        .current_url()
        .await
        .map_err(|e| EngineError::Navigation(e.to_string()))?;
    if !landed.as_str().to_lowercase().contains(&expected_username.to_lowercase()) {
        return Err(EngineError::NotFound(format!(
            "landed url {landed} no longer contains username {expected_username}"
        )));
    }
    Ok(())
}

/// Locator helper so callers don't sprinkle `Locator::Css` string literals.
pub fn css(selector: &'static str) -> Locator<'static> {
    Locator::Css(selector)
}
