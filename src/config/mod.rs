//! Configuration for the tracking engine (spec §10.1).
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/accwatch/config.toml)
//! 3. Built-in defaults (lowest priority)

use crate::browser_pool::BrowserPoolConfig;
use crate::fetcher::FetcherConfig;
use crate::proxy_pool::ProxyPoolConfig;
use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ─────────────────────────────────────────────────────────────────────────────
// Application configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerSection,
    pub proxies: ProxiesSection,
    pub browsers: BrowsersSection,
    pub fetcher: FetcherSection,
    pub alerts: AlertsSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSection::default(),
            proxies: ProxiesSection::default(),
            browsers: BrowsersSection::default(),
            fetcher: FetcherSection::default(),
            alerts: AlertsSection::default(),
            storage: StorageSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub max_concurrent_workers: usize,
    pub jitter_pct: f64,
    pub min_interval_secs: u64,
    pub no_proxy_retry_delay_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let d = SchedulerConfig::default();
        Self {
            max_concurrent_workers: d.max_concurrent_workers,
            jitter_pct: d.jitter_pct,
            min_interval_secs: d.min_interval.as_secs(),
            no_proxy_retry_delay_secs: d.no_proxy_retry_delay.as_secs(),
        }
    }
}

impl SchedulerSection {
    pub fn to_component(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_workers: self.max_concurrent_workers,
            jitter_pct: self.jitter_pct,
            min_interval: Duration::from_secs(self.min_interval_secs),
            no_proxy_retry_delay: Duration::from_secs(self.no_proxy_retry_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxiesSection {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub max_usage_per_proxy: u64,
    pub cooling_period_secs: u64,
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    pub health_check_url: String,
    /// Where the on-disk proxy file (spec §6 wire format) lives, if any.
    pub proxy_file: Option<PathBuf>,
}

impl Default for ProxiesSection {
    fn default() -> Self {
        let d = ProxyPoolConfig::default();
        Self {
            min_interval_secs: d.min_interval.as_secs(),
            max_interval_secs: d.max_interval.as_secs(),
            max_usage_per_proxy: d.max_usage_per_proxy,
            cooling_period_secs: d.cooling_period.as_secs(),
            health_check_interval_secs: d.health_check_interval.as_secs(),
            health_check_timeout_secs: d.health_check_timeout.as_secs(),
            health_check_url: d.health_check_url,
            proxy_file: None,
        }
    }
}

impl ProxiesSection {
    pub fn to_component(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            min_interval: Duration::from_secs(self.min_interval_secs),
            max_interval: Duration::from_secs(self.max_interval_secs),
            max_usage_per_proxy: self.max_usage_per_proxy,
            cooling_period: Duration::from_secs(self.cooling_period_secs),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            health_check_timeout: Duration::from_secs(self.health_check_timeout_secs),
            health_check_url: self.health_check_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowsersSection {
    pub max_browsers: usize,
    pub max_pages_per_browser: usize,
    pub max_browser_age_secs: u64,
    pub browser_reset_count: u32,
    pub webdriver_url: String,
    pub navigation_timeout_secs: u64,
}

impl Default for BrowsersSection {
    fn default() -> Self {
        let d = BrowserPoolConfig::default();
        Self {
            max_browsers: d.max_browsers,
            max_pages_per_browser: d.max_pages_per_browser,
            max_browser_age_secs: d.max_browser_age.as_secs(),
            browser_reset_count: d.browser_reset_count,
            webdriver_url: d.webdriver_url,
            navigation_timeout_secs: d.navigation_timeout.as_secs(),
        }
    }
}

impl BrowsersSection {
    pub fn to_component(&self) -> BrowserPoolConfig {
        BrowserPoolConfig {
            webdriver_url: self.webdriver_url.clone(),
            max_browsers: self.max_browsers,
            max_pages_per_browser: self.max_pages_per_browser,
            max_browser_age: Duration::from_secs(self.max_browser_age_secs),
            browser_reset_count: self.browser_reset_count,
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            ..BrowserPoolConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherSection {
    pub base_url: String,
    pub max_recent_posts: usize,
    pub max_scroll_iterations: u32,
}

impl Default for FetcherSection {
    fn default() -> Self {
        let d = FetcherConfig::default();
        Self {
            base_url: d.base_url,
            max_recent_posts: d.max_recent_posts,
            max_scroll_iterations: d.max_scroll_iterations,
        }
    }
}

impl FetcherSection {
    pub fn to_component(&self) -> FetcherConfig {
        FetcherConfig {
            base_url: self.base_url.clone(),
            max_recent_posts: self.max_recent_posts,
            max_scroll_iterations: self.max_scroll_iterations,
            ..FetcherConfig::default()
        }
    }
}

/// Default channel configuration applied to new alert rules that don't
/// specify their own, and the dedup window accepted but not enforced by the
/// engine (`SPEC_FULL.md` §11 open-question decision 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsSection {
    pub default_channel_config: serde_json::Value,
    pub throttle_window_ms: u64,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            default_channel_config: serde_json::Value::Null,
            throttle_window_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    InMemory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    pub backend: StorageBackend,
    /// Ignored when `backend` is `in_memory`.
    pub sqlite_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::InMemory,
            sqlite_path: PathBuf::from("./accwatch.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    pub level: String,
    /// Logs to a rolling file under this directory instead of stdout
    /// (headless/daemon operation, spec §10.2). `None` logs to stdout.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File configuration (deserialization layer, all fields optional)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    scheduler: Option<SchedulerSection>,
    proxies: Option<ProxiesSection>,
    browsers: Option<BrowsersSection>,
    fetcher: Option<FetcherSection>,
    alerts: Option<AlertsSection>,
    storage: Option<StorageSection>,
    logging: Option<LoggingSection>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// `~/.config/accwatch/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("accwatch").join("config.toml"))
    }

    /// Create the config file with defaults if it doesn't exist yet. Called
    /// during startup to help operators discover configuration knobs.
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };
        if path.exists() {
            return;
        }
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Render this config as the TOML this lineage's config file uses.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Load file config if it exists.
    ///
    /// # Panics
    /// If the config file exists but cannot be parsed. A broken config
    /// should fail fast with a clear error, not silently fall back to
    /// defaults while the operator debugs the wrong thing.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("\nCONFIG ERROR - failed to parse {}\n", path.display());
                    eprintln!("  {e}\n");
                    eprintln!("  To reset, delete the file and restart accwatch.\n");
                    std::process::exit(1);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                eprintln!("\nCONFIG ERROR - cannot read {}\n", path.display());
                eprintln!("  {e}\n");
                std::process::exit(1);
            }
        }
    }

    /// Load configuration: env > file > defaults.
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        let mut config = Self {
            scheduler: file.scheduler.unwrap_or_default(),
            proxies: file.proxies.unwrap_or_default(),
            browsers: file.browsers.unwrap_or_default(),
            fetcher: file.fetcher.unwrap_or_default(),
            alerts: file.alerts.unwrap_or_default(),
            storage: file.storage.unwrap_or_default(),
            logging: file.logging.unwrap_or_default(),
        };

        if let Ok(v) = std::env::var("ACCWATCH_MAX_CONCURRENT_WORKERS") {
            if let Ok(v) = v.parse() {
                config.scheduler.max_concurrent_workers = v;
            }
        }
        if let Ok(v) = std::env::var("ACCWATCH_MAX_BROWSERS") {
            if let Ok(v) = v.parse() {
                config.browsers.max_browsers = v;
            }
        }
        if let Ok(v) = std::env::var("ACCWATCH_WEBDRIVER_URL") {
            config.browsers.webdriver_url = v;
        }
        if let Ok(v) = std::env::var("ACCWATCH_FETCHER_BASE_URL") {
            config.fetcher.base_url = v;
        }
        if let Ok(v) = std::env::var("ACCWATCH_STORAGE_BACKEND") {
            config.storage.backend = match v.to_lowercase().as_str() {
                "sqlite" => StorageBackend::Sqlite,
                _ => StorageBackend::InMemory,
            };
        }
        if let Ok(v) = std::env::var("ACCWATCH_SQLITE_PATH") {
            config.storage.sqlite_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RUST_LOG") {
            config.logging.level = v;
        } else if let Ok(v) = std::env::var("ACCWATCH_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("ACCWATCH_LOG_DIR") {
            config.logging.log_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ACCWATCH_PROXY_FILE") {
            config.proxies.proxy_file = Some(PathBuf::from(v));
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let toml = config.to_toml();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.scheduler.max_concurrent_workers, config.scheduler.max_concurrent_workers);
        assert_eq!(parsed.browsers.max_browsers, config.browsers.max_browsers);
    }

    #[test]
    fn scheduler_section_converts_seconds_into_durations() {
        let section = SchedulerSection {
            max_concurrent_workers: 2,
            jitter_pct: 0.1,
            min_interval_secs: 5,
            no_proxy_retry_delay_secs: 20,
        };
        let component = section.to_component();
        assert_eq!(component.min_interval, Duration::from_secs(5));
        assert_eq!(component.no_proxy_retry_delay, Duration::from_secs(20));
    }
}
