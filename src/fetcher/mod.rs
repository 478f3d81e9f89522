//! The Fetcher (spec §4.3): turns one `Account` into one `Sample` by
//! navigating a leased browser page, through a leased proxy, to the
//! account's profile.

mod count;

use crate::browser_pool::{css, goto_and_verify, is_disconnect_signal, BrowserPool};
use crate::clock::Clock;
use crate::domain::account::Account;
use crate::domain::sample::{Engagement, Sample};
use crate::error::{EngineError, EngineResult};
use crate::proxy_pool::ProxyPool;
use chrono::{DateTime, Utc};
use fantoccini::Locator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub base_url: String,
    pub navigation_timeout: Duration,
    pub max_recent_posts: usize,
    pub max_scroll_iterations: u32,
    pub stats_container_selector: &'static str,
    pub post_cell_selector: &'static str,
    pub promoted_post_selector: &'static str,
    pub followers_selector: &'static str,
    pub following_selector: &'static str,
    pub posts_count_selector: &'static str,
    pub like_count_selector: &'static str,
    pub retweet_count_selector: &'static str,
    pub reply_count_selector: &'static str,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://x.com".to_string(),
            navigation_timeout: Duration::from_secs(30),
            max_recent_posts: 20,
            max_scroll_iterations: 12,
            stats_container_selector: "[data-testid=\"UserProfileHeader_Items\"]",
            post_cell_selector: "[data-testid=\"tweet\"]",
            promoted_post_selector: "[data-testid=\"promotedIndicator\"]",
            followers_selector: "a[href$=\"/followers\"] span",
            following_selector: "a[href$=\"/following\"] span",
            posts_count_selector: "[data-testid=\"primaryColumn\"] h2 span",
            like_count_selector: "[data-testid=\"like\"]",
            retweet_count_selector: "[data-testid=\"retweet\"]",
            reply_count_selector: "[data-testid=\"reply\"]",
        }
    }
}

pub struct Fetcher {
    config: FetcherConfig,
    browser_pool: Arc<BrowserPool>,
    proxy_pool: Arc<ProxyPool>,
    clock: Arc<dyn Clock>,
}

impl Fetcher {
    pub fn new(
        config: FetcherConfig,
        browser_pool: Arc<BrowserPool>,
        proxy_pool: Arc<ProxyPool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            browser_pool,
            proxy_pool,
            clock,
        }
    }

    /// Scrape `account`'s profile into a `Sample`. `previous_observed_at` is
    /// threaded through from the caller's last-known Sample so it can be
    /// recorded as `previous_ref`; the Fetcher itself is stateless between
    /// calls.
    pub async fn fetch(
        &self,
        account: &Account,
        previous_observed_at: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> EngineResult<Sample> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), account.username);
        let browser_pool = Arc::clone(&self.browser_pool);
        let config = self.config.clone();
        let username = account.username.clone();
        let account_id = account.id.clone();
        let clock = Arc::clone(&self.clock);

        self.proxy_pool
            .with_proxy(move |proxy| async move {
                let lease = browser_pool.get_page(&proxy.id, cancel).await?;
                let result = Self::scrape(&lease.client, &config, &url, &username).await;
                match &result {
                    Err(e) if is_disconnect_signal(&e.to_string()) => {
                        browser_pool.remove_disconnected(lease.browser_id).await;
                    }
                    _ => browser_pool.release_page(lease.browser_id).await,
                }

                let (followers, following, posts, likes, retweets, replies) = result?;
                let engagement = if likes.is_empty() && retweets.is_empty() && replies.is_empty() {
                    Engagement::default()
                } else {
                    Engagement {
                        avg_likes: count::mean_rounded(&likes),
                        avg_retweets: count::mean_rounded(&retweets),
                        avg_replies: count::mean_rounded(&replies),
                    }
                };

                Ok(Sample {
                    account_id,
                    observed_at: clock.now(),
                    followers,
                    following,
                    posts,
                    engagement,
                    source: Sample::SOURCE_SCRAPER.to_string(),
                    previous_ref: previous_observed_at,
                })
            })
            .await
    }

    #[allow(clippy::type_complexity)]
    async fn scrape(
        client: &fantoccini::Client,
        config: &FetcherConfig,
        url: &str,
        username: &str,
    ) -> EngineResult<(u64, u64, u64, Vec<u64>, Vec<u64>, Vec<u64>)> {
        goto_and_verify(client, url, username, config.navigation_timeout).await?;

        let followers = Self::extract_count(client, config.followers_selector).await?;
        let following = Self::extract_count(client, config.following_selector).await?;
        let posts = Self::extract_count(client, config.posts_count_selector).await.unwrap_or(0);

        let cells = Self::collect_post_cells(client, config).await?;

        let mut likes = Vec::with_capacity(cells.len());
        let mut retweets = Vec::with_capacity(cells.len());
        let mut replies = Vec::with_capacity(cells.len());
        for cell in &cells {
            if let Ok(value) = Self::extract_count_within(cell, config.like_count_selector).await {
                likes.push(value);
            }
            if let Ok(value) = Self::extract_count_within(cell, config.retweet_count_selector).await {
                retweets.push(value);
            }
            if let Ok(value) = Self::extract_count_within(cell, config.reply_count_selector).await {
                replies.push(value);
            }
        }

        Ok((followers, following, posts, likes, retweets, replies))
    }

    async fn extract_count(client: &fantoccini::Client, selector: &str) -> EngineResult<u64> {
        let element = client
            .find(css(selector))
            .await
            .map_err(|e| EngineError::Parse(format!("selector {selector} not found: {e}")))?;
        let text = element
            .text()
            .await
            .map_err(|e| EngineError::Parse(format!("failed reading text for {selector}: {e}")))?;
        Ok(count::parse_count(&text))
    }

    async fn extract_count_within(cell: &fantoccini::elements::Element, selector: &str) -> EngineResult<u64> {
        let element = cell
            .find(Locator::Css(selector))
            .await
            .map_err(|e| EngineError::Parse(format!("selector {selector} not found in post cell: {e}")))?;
        let text = element
            .text()
            .await
            .map_err(|e| EngineError::Parse(format!("failed reading text for {selector}: {e}")))?;
        Ok(count::parse_count(&text))
    }

    /// Up to `max_recent_posts` non-promoted post cells, scrolling to load
    /// more if fewer are initially visible (spec §4.3).
    async fn collect_post_cells(
        client: &fantoccini::Client,
        config: &FetcherConfig,
    ) -> EngineResult<Vec<fantoccini::elements::Element>> {
        let mut seen_count = 0;
        for _ in 0..config.max_scroll_iterations {
            let cells = Self::visible_post_cells(client, config).await?;
            if cells.len() >= config.max_recent_posts {
                return Ok(cells.into_iter().take(config.max_recent_posts).collect());
            }
            if cells.len() == seen_count {
                return Ok(cells);
            }
            seen_count = cells.len();

            client
                .execute("window.scrollTo(0, document.body.scrollHeight);", vec![])
                .await
                .map_err(|e| EngineError::Navigation(format!("scroll failed: {e}")))?;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        debug!(seen_count, "scroll-to-load hit the iteration cap");
        Self::visible_post_cells(client, config).await
    }

    async fn visible_post_cells(
        client: &fantoccini::Client,
        config: &FetcherConfig,
    ) -> EngineResult<Vec<fantoccini::elements::Element>> {
        let all = client
            .find_all(css(config.post_cell_selector))
            .await
            .map_err(|e| EngineError::Parse(format!("post cell selector not found: {e}")))?;

        let mut kept = Vec::with_capacity(all.len());
        for cell in all {
            let is_promoted = cell
                .find(Locator::Css(config.promoted_post_selector))
                .await
                .is_ok();
            if is_promoted {
                continue;
            }
            kept.push(cell);
            if kept.len() >= config.max_recent_posts {
                break;
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_point_at_a_real_base_url() {
        let config = FetcherConfig::default();
        assert!(config.base_url.starts_with("https://"));
        assert_eq!(config.max_recent_posts, 20);
    }
}
