//! Structured logging setup (spec §10.2): an `EnvFilter` over the configured
//! level, a `fmt` layer for stdout, and an optional `tracing-appender`
//! rolling-file layer for headless/daemon operation.

use crate::config::LoggingSection;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Must be kept alive for the lifetime of the process; dropping it stops the
/// background flush thread for the rolling-file layer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides
/// `config.level` (carried through `Config::from_env`, so by the time this
/// runs `config.level` already reflects that precedence).
pub fn init(config: &LoggingSection) -> LoggingGuard {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "accwatch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            Registry::default().with(filter).with(file_layer).init();
            LoggingGuard { _file_guard: Some(guard) }
        }
        None => {
            let stdout_layer = tracing_subscriber::fmt::layer();
            Registry::default().with(filter).with(stdout_layer).init();
            LoggingGuard { _file_guard: None }
        }
    }
}
