//! Persistence ports the engine consumes (spec §6) and their reference
//! implementations.
//!
//! The engine does not own a database. `AccountStore`, `MetricsSink` and
//! `AlertStore` are traits; an in-memory implementation of each is always
//! available (and is the reference implementation for `MetricsSink`
//! specifically), with a SQLite-backed sibling behind the same interface
//! selected by `config.storage` — the same mock/production split the
//! teacher draws between its JSONL writer and a future database writer
//! (design note #9).

mod memory;
mod sqlite;

pub use memory::{InMemoryAccountStore, InMemoryAlertStore};
pub use sqlite::{open_pool, SqliteAccountStore, SqliteAlertStore, SqlitePool};

use crate::domain::account::AccountId;
use crate::domain::{Account, AlertRule};
use crate::error::EngineResult;
use async_trait::async_trait;

/// Durable accounts. The Account Registry is the authoritative in-memory
/// copy; this is where it persists mutations and loads its initial state.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load_all(&self) -> EngineResult<Vec<Account>>;
    async fn upsert(&self, account: &Account) -> EngineResult<()>;
    async fn delete(&self, id: &AccountId) -> EngineResult<()>;
}

/// Durable alert rule definitions.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn load_all(&self) -> EngineResult<Vec<AlertRule>>;
    async fn upsert(&self, rule: &AlertRule) -> EngineResult<()>;
    async fn delete(&self, id: &str) -> EngineResult<()>;
}

// `MetricsSink` lives in `crate::metrics` next to the store it backs — the
// time-series query surface (`latest`, `range`, `analysis`) is too tightly
// coupled to the Metrics Store's own types to usefully live apart from it.
