// accwatch - tracking engine for monitored social accounts
//
// Scrapes a configurable set of accounts on a priority-driven schedule
// through a pool of rotating proxies and headless browsers, records the
// results as a time series, and evaluates alert rules against each new
// sample.
//
// Architecture:
// - Account Registry: the authoritative in-memory set of tracked accounts
// - Priority Scheduler: per-account timers, a bounded worker pool, a ready queue
// - Proxy Pool / Browser Pool: the resources a scrape needs
// - Fetcher: turns one account into one sample
// - Metrics Store / Alert Engine: what a completed sample feeds into
// - Orchestrator: the single `Engine` value wiring all of the above together

mod alerts;
mod browser_pool;
mod cli;
mod clock;
mod config;
mod domain;
mod error;
mod fetcher;
mod logging;
mod metrics;
mod orchestrator;
mod proxy_pool;
mod random;
mod registry;
mod scheduler;
mod startup;
mod storage;
mod util;

use anyhow::{Context, Result};
use config::{Config, StorageBackend};
use domain::proxy::ProxyFile;
use domain::ProxyRecord;
use metrics::{InMemoryMetricsStore, MetricsSink, SqliteMetricsStore};
use orchestrator::{Engine, EngineConfig};
use std::path::Path;
use std::sync::Arc;
use storage::{open_pool, AccountStore, AlertStore, InMemoryAccountStore, InMemoryAlertStore, SqliteAccountStore, SqliteAlertStore};

#[tokio::main]
async fn main() -> Result<()> {
    if cli::handle_cli() {
        return Ok(());
    }

    Config::ensure_config_exists();
    let config = Config::from_env();

    startup::print_startup(&config);
    let _logging_guard = logging::init(&config.logging);

    let engine = match build_engine(&config).await {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct engine");
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.initialize().await {
        tracing::error!(error = %e, "failed to initialize engine");
        std::process::exit(1);
    }

    engine.start();
    tracing::info!("engine running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    engine.stop().await;

    Ok(())
}

async fn build_engine(config: &Config) -> Result<Engine> {
    let clock = clock::system();
    let random = random::thread_random();

    let (account_store, alert_store, metrics): (Arc<dyn AccountStore>, Arc<dyn AlertStore>, Arc<dyn MetricsSink>) =
        match config.storage.backend {
            StorageBackend::InMemory => (
                Arc::new(InMemoryAccountStore::new()),
                Arc::new(InMemoryAlertStore::new()),
                Arc::new(InMemoryMetricsStore::new()),
            ),
            StorageBackend::Sqlite => {
                let pool = open_pool(&config.storage.sqlite_path)?;
                let metrics = SqliteMetricsStore::new(pool.clone())?;
                (
                    Arc::new(SqliteAccountStore::new(pool.clone())),
                    Arc::new(SqliteAlertStore::new(pool)),
                    Arc::new(metrics),
                )
            }
        };

    let proxies = load_proxies(config.proxies.proxy_file.as_deref()).await;

    let engine_config = EngineConfig {
        scheduler: config.scheduler.to_component(),
        proxies: config.proxies.to_component(),
        browsers: config.browsers.to_component(),
        fetcher: config.fetcher.to_component(),
        proxy_file: config.proxies.proxy_file.clone(),
    };

    Ok(Engine::new(
        engine_config,
        account_store,
        alert_store,
        metrics,
        proxies,
        alerts::ChannelRouter::with_log_only(),
        clock,
        random,
    ))
}

/// Load the on-disk proxy file (spec §6 wire format) if configured and
/// present. A missing file is not an error — the pool simply starts empty.
async fn load_proxies(path: Option<&Path>) -> Vec<ProxyRecord> {
    let Some(path) = path else {
        return Vec::new();
    };
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read proxy file");
            return Vec::new();
        }
    };
    let file: ProxyFile = match serde_json::from_str(&contents) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse proxy file");
            return Vec::new();
        }
    };
    file.proxies
        .into_iter()
        .map(|entry| ProxyRecord::new(entry.host, entry.port, entry.protocol, entry.auth))
        .collect()
}
