//! SQLite-backed implementations of the persistence ports, selected by
//! `config.storage.backend = "sqlite"`. Mirrors the teacher's own choice of
//! a real embedded database (`rusqlite` + `r2d2`) for its lifetime
//! statistics store, generalized here to accounts and alert rules.

use super::{AccountStore, AlertStore};
use crate::domain::account::{AccountId, Priority};
use crate::domain::{Account, AccountError, AlertRule, Channel, Op, Window};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::collections::HashSet;
use std::path::Path;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

fn internal<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::Internal(e.to_string())
}

/// Open (creating if needed) a connection pool and run the schema migration.
pub fn open_pool(path: &Path) -> EngineResult<SqlitePool> {
    let manager = SqliteConnectionManager::file(path);
    let pool = r2d2::Pool::new(manager).map_err(internal)?;
    let conn = pool.get().map_err(internal)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            display_name TEXT NOT NULL,
            profile_url TEXT NOT NULL,
            priority INTEGER NOT NULL,
            active INTEGER NOT NULL,
            tags TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_scraped_at TEXT,
            last_error_message TEXT,
            last_error_at TEXT
        );
        CREATE TABLE IF NOT EXISTS alert_rules (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            metric TEXT NOT NULL,
            op TEXT NOT NULL,
            threshold REAL NOT NULL,
            window TEXT NOT NULL,
            channel TEXT NOT NULL,
            channel_config TEXT NOT NULL,
            description TEXT NOT NULL,
            active INTEGER NOT NULL,
            last_triggered_at TEXT
        );",
    )
    .map_err(internal)?;
    Ok(pool)
}

pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    let priority_raw: u8 = row.get("priority")?;
    let tags_raw: String = row.get("tags")?;
    let last_error_message: Option<String> = row.get("last_error_message")?;
    let last_error_at: Option<DateTime<Utc>> = row.get("last_error_at")?;
    Ok(Account {
        id: row.get("id")?,
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        profile_url: row.get("profile_url")?,
        priority: Priority::new(priority_raw).unwrap_or_default(),
        active: row.get::<_, i64>("active")? != 0,
        tags: tags_raw
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<HashSet<_>>(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        last_scraped_at: row.get("last_scraped_at")?,
        last_error: last_error_message.zip(last_error_at).map(|(message, at)| AccountError { message, at }),
    })
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn load_all(&self) -> EngineResult<Vec<Account>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let mut stmt = conn.prepare("SELECT * FROM accounts").map_err(internal)?;
            let rows = stmt
                .query_map([], row_to_account)
                .map_err(internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(internal)?;
            Ok(rows)
        })
        .await
        .map_err(internal)?
    }

    async fn upsert(&self, account: &Account) -> EngineResult<()> {
        let pool = self.pool.clone();
        let account = account.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let tags = account.tags.iter().cloned().collect::<Vec<_>>().join(",");
            let (last_error_message, last_error_at) = match &account.last_error {
                Some(e) => (Some(e.message.clone()), Some(e.at)),
                None => (None, None),
            };
            conn.execute(
                "INSERT INTO accounts (id, username, display_name, profile_url, priority, active,
                    tags, created_at, updated_at, last_scraped_at, last_error_message, last_error_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    username=excluded.username, display_name=excluded.display_name,
                    profile_url=excluded.profile_url, priority=excluded.priority,
                    active=excluded.active, tags=excluded.tags, updated_at=excluded.updated_at,
                    last_scraped_at=excluded.last_scraped_at,
                    last_error_message=excluded.last_error_message,
                    last_error_at=excluded.last_error_at",
                params![
                    account.id,
                    account.username,
                    account.display_name,
                    account.profile_url,
                    account.priority.get(),
                    account.active as i64,
                    tags,
                    account.created_at,
                    account.updated_at,
                    account.last_scraped_at,
                    last_error_message,
                    last_error_at,
                ],
            )
            .map_err(internal)?;
            Ok(())
        })
        .await
        .map_err(internal)?
    }

    async fn delete(&self, id: &AccountId) -> EngineResult<()> {
        let pool = self.pool.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])
                .map_err(internal)?;
            Ok(())
        })
        .await
        .map_err(internal)?
    }
}

pub struct SqliteAlertStore {
    pool: SqlitePool,
}

impl SqliteAlertStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn op_to_str(op: Op) -> &'static str {
    match op {
        Op::Gt => "gt",
        Op::Lt => "lt",
        Op::Gte => "gte",
        Op::Lte => "lte",
        Op::Eq => "eq",
        Op::Ne => "ne",
    }
}

fn op_from_str(s: &str) -> Op {
    match s {
        "gt" => Op::Gt,
        "lt" => Op::Lt,
        "gte" => Op::Gte,
        "lte" => Op::Lte,
        "eq" => Op::Eq,
        _ => Op::Ne,
    }
}

fn window_to_str(window: Window) -> &'static str {
    match window {
        Window::OneHour => "1h",
        Window::SixHours => "6h",
        Window::TwelveHours => "12h",
        Window::OneDay => "24h",
        Window::SevenDays => "7d",
        Window::ThirtyDays => "30d",
    }
}

fn window_from_str(s: &str) -> Window {
    match s {
        "1h" => Window::OneHour,
        "6h" => Window::SixHours,
        "12h" => Window::TwelveHours,
        "7d" => Window::SevenDays,
        "30d" => Window::ThirtyDays,
        _ => Window::OneDay,
    }
}

fn channel_to_str(channel: Channel) -> &'static str {
    match channel {
        Channel::Log => "log",
        Channel::Email => "email",
        Channel::Webhook => "webhook",
    }
}

fn channel_from_str(s: &str) -> Channel {
    match s {
        "email" => Channel::Email,
        "webhook" => Channel::Webhook,
        _ => Channel::Log,
    }
}

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<AlertRule> {
    let op_raw: String = row.get("op")?;
    let window_raw: String = row.get("window")?;
    let channel_raw: String = row.get("channel")?;
    let channel_config_raw: String = row.get("channel_config")?;
    Ok(AlertRule {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        metric: row.get("metric")?,
        op: op_from_str(&op_raw),
        threshold: row.get("threshold")?,
        window: window_from_str(&window_raw),
        channel: channel_from_str(&channel_raw),
        channel_config: serde_json::from_str(&channel_config_raw).unwrap_or(serde_json::Value::Null),
        description: row.get("description")?,
        active: row.get::<_, i64>("active")? != 0,
        last_triggered_at: row.get("last_triggered_at")?,
    })
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    async fn load_all(&self) -> EngineResult<Vec<AlertRule>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let mut stmt = conn.prepare("SELECT * FROM alert_rules").map_err(internal)?;
            let rows = stmt
                .query_map([], row_to_rule)
                .map_err(internal)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(internal)?;
            Ok(rows)
        })
        .await
        .map_err(internal)?
    }

    async fn upsert(&self, rule: &AlertRule) -> EngineResult<()> {
        let pool = self.pool.clone();
        let rule = rule.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            let channel_config = serde_json::to_string(&rule.channel_config).map_err(internal)?;
            conn.execute(
                "INSERT INTO alert_rules (id, account_id, metric, op, threshold, window, channel,
                    channel_config, description, active, last_triggered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    account_id=excluded.account_id, metric=excluded.metric, op=excluded.op,
                    threshold=excluded.threshold, window=excluded.window, channel=excluded.channel,
                    channel_config=excluded.channel_config, description=excluded.description,
                    active=excluded.active, last_triggered_at=excluded.last_triggered_at",
                params![
                    rule.id,
                    rule.account_id,
                    rule.metric,
                    op_to_str(rule.op),
                    rule.threshold,
                    window_to_str(rule.window),
                    channel_to_str(rule.channel),
                    channel_config,
                    rule.description,
                    rule.active as i64,
                    rule.last_triggered_at,
                ],
            )
            .map_err(internal)?;
            Ok(())
        })
        .await
        .map_err(internal)?
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(internal)?;
            conn.execute("DELETE FROM alert_rules WHERE id = ?1", params![id])
                .map_err(internal)?;
            Ok(())
        })
        .await
        .map_err(internal)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Priority;

    fn account(id: &str) -> Account {
        Account {
            id: id.into(),
            username: id.into(),
            display_name: id.into(),
            profile_url: format!("https://example.com/{id}"),
            priority: Priority::new(3).unwrap(),
            active: true,
            tags: HashSet::from(["vip".to_string()]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_scraped_at: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn round_trips_an_account_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("test.db")).unwrap();
        let store = SqliteAccountStore::new(pool);
        store.upsert(&account("a1")).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a1");
        assert!(loaded[0].tags.contains("vip"));
    }
}
