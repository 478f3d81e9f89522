// Startup module - displays a banner and module loading status
//
// This module prints a short boot summary showing version info and which
// storage/alert backends are wired up, before the engine starts dispatching.

use crate::config::{Config, StorageBackend, VERSION};

mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
}

pub struct ModuleStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub description: String,
}

/// Print the startup banner and module status. Runs once before
/// `Engine::start`.
pub fn print_startup(config: &Config) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}accwatch{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Tracking engine for monitored social accounts{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}\u{2713}{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    println!("  {DIM}Loading modules...{RESET}");
    for module in module_status(config) {
        print_module_status(&module);
    }
    println!();
}

fn module_status(config: &Config) -> Vec<ModuleStatus> {
    vec![
        ModuleStatus {
            name: "scheduler",
            enabled: true,
            description: format!("{} worker(s)", config.scheduler.max_concurrent_workers),
        },
        ModuleStatus {
            name: "proxy-pool",
            enabled: true,
            description: format!("max usage {}/proxy", config.proxies.max_usage_per_proxy),
        },
        ModuleStatus {
            name: "browser-pool",
            enabled: true,
            description: format!("{} browser(s) max", config.browsers.max_browsers),
        },
        ModuleStatus {
            name: "fetcher",
            enabled: true,
            description: config.fetcher.base_url.clone(),
        },
        ModuleStatus {
            name: "alerts",
            enabled: true,
            description: "log channel always on".to_string(),
        },
        ModuleStatus {
            name: "storage",
            enabled: true,
            description: match config.storage.backend {
                StorageBackend::InMemory => "in-memory".to_string(),
                StorageBackend::Sqlite => config.storage.sqlite_path.display().to_string(),
            },
        },
    ]
}

fn print_module_status(module: &ModuleStatus) {
    use colors::*;
    let icon = if module.enabled { format!("{GREEN}\u{2713}{RESET}") } else { format!("{DIM}\u{25cb}{RESET}") };
    println!("    {icon} {BOLD}{:<14}{RESET} {DIM}{}{RESET}", module.name, module.description);
}
