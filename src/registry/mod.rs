//! The Account Registry (spec §4.4): the authoritative in-memory set of
//! tracked accounts, backed by an `AccountStore` for durability and
//! publishing `AccountChanged` events the Scheduler subscribes to.

use crate::clock::Clock;
use crate::domain::account::{AccountChanged, AccountError, AccountFilter, AccountId, ChangeKind};
use crate::domain::Account;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use crate::storage::AccountStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

const CHANGE_CHANNEL_CAPACITY: usize = 256;
/// `lastError.message` is free text from a scrape failure; bound it before
/// it reaches the registry or a log line (§1 Non-goals: aggregates, not
/// unbounded scraped text).
const MAX_ERROR_MESSAGE_BYTES: usize = 2048;

pub struct AccountRegistry {
    accounts: DashMap<AccountId, Account>,
    by_username: DashMap<String, AccountId>,
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    changes: broadcast::Sender<AccountChanged>,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            accounts: DashMap::new(),
            by_username: DashMap::new(),
            store,
            clock,
            changes,
        }
    }

    /// Load every durable account into memory. Call once at startup.
    pub async fn load(&self) -> EngineResult<()> {
        for account in self.store.load_all().await? {
            self.index(account);
        }
        info!(count = self.accounts.len(), "loaded accounts from store");
        Ok(())
    }

    fn index(&self, account: Account) {
        if account.active {
            self.by_username.insert(account.username.to_lowercase(), account.id.clone());
        }
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccountChanged> {
        self.changes.subscribe()
    }

    fn emit(&self, account_id: AccountId, kind: ChangeKind) {
        let _ = self.changes.send(AccountChanged { account_id, kind });
    }

    fn username_taken_by_another(&self, id: &AccountId, username: &str) -> bool {
        self.by_username
            .get(&username.to_lowercase())
            .map(|entry| entry.value() != id)
            .unwrap_or(false)
    }

    pub async fn add(&self, mut account: Account) -> EngineResult<()> {
        if self.accounts.contains_key(&account.id) {
            return Err(EngineError::Conflict(format!("account {} already exists", account.id)));
        }
        if account.active && self.username_taken_by_another(&account.id, &account.username) {
            return Err(EngineError::Conflict(format!(
                "username {} already tracked by an active account",
                account.username
            )));
        }
        let now = self.clock.now();
        account.created_at = now;
        account.updated_at = now;

        self.store.upsert(&account).await?;
        let id = account.id.clone();
        self.index(account);
        self.emit(id, ChangeKind::Created);
        Ok(())
    }

    pub async fn update(&self, mut account: Account) -> EngineResult<()> {
        let existing = self
            .accounts
            .get(&account.id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("account {} not found", account.id)))?;

        if account.active && self.username_taken_by_another(&account.id, &account.username) {
            return Err(EngineError::Conflict(format!(
                "username {} already tracked by an active account",
                account.username
            )));
        }

        account.created_at = existing.created_at;
        account.updated_at = self.clock.now();

        self.store.upsert(&account).await?;

        self.by_username.retain(|_, v| v != &account.id);
        let id = account.id.clone();
        let kind = match (existing.active, account.active) {
            (false, true) => ChangeKind::Activated,
            (true, false) => ChangeKind::Deactivated,
            _ => ChangeKind::Updated,
        };
        self.index(account);
        self.emit(id, kind);
        Ok(())
    }

    /// Record the outcome of a completed fetch without emitting an
    /// `AccountChanged` event — this is internal scheduler bookkeeping, not
    /// the kind of external mutation `{created,updated,deleted,activated,
    /// deactivated}` describes, so it must not re-trigger scheduling.
    pub async fn record_scrape_result(
        &self,
        id: &AccountId,
        observed_at: Option<DateTime<Utc>>,
        error: Option<AccountError>,
    ) -> EngineResult<()> {
        let Some(mut account) = self.get(id) else {
            return Ok(());
        };
        if let Some(observed_at) = observed_at {
            account.last_scraped_at = Some(observed_at);
        }
        account.last_error = error.map(|mut e| {
            e.message = crate::util::truncate_utf8_safe(&e.message, MAX_ERROR_MESSAGE_BYTES).to_string();
            e
        });
        account.updated_at = self.clock.now();
        self.store.upsert(&account).await?;
        self.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    pub async fn delete(&self, id: &AccountId) -> EngineResult<()> {
        if !self.accounts.contains_key(id) {
            return Err(EngineError::NotFound(format!("account {id} not found")));
        }
        self.store.delete(id).await?;
        self.accounts.remove(id);
        self.by_username.retain(|_, v| v != id);
        self.emit(id.clone(), ChangeKind::Deleted);
        Ok(())
    }

    pub fn get(&self, id: &AccountId) -> Option<Account> {
        self.accounts.get(id).map(|e| e.value().clone())
    }

    pub fn get_by_username(&self, username: &str) -> Option<Account> {
        let id = self.by_username.get(&username.to_lowercase())?;
        self.get(&id)
    }

    pub fn list(&self, filter: &AccountFilter) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| filter.matches(a))
            .collect()
    }

    /// Highest priority first, then oldest `last_scraped_at` (never-scraped
    /// accounts first). Consulted only for ad-hoc queries; the scheduler's
    /// steady state is driven by its own per-account timers.
    pub fn next_to_scrape(&self) -> Option<Account> {
        self.accounts
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| a.active)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| match (a.last_scraped_at, b.last_scraped_at) {
                        (None, None) => std::cmp::Ordering::Equal,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (Some(x), Some(y)) => y.cmp(&x),
                    })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::account::Priority;
    use crate::storage::InMemoryAccountStore;
    use chrono::Utc;
    use std::collections::HashSet;

    fn account(id: &str, username: &str, priority: u8) -> Account {
        Account {
            id: id.into(),
            username: username.into(),
            display_name: username.into(),
            profile_url: format!("https://example.com/{username}"),
            priority: Priority::new(priority).unwrap(),
            active: true,
            tags: HashSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_scraped_at: None,
            last_error: None,
        }
    }

    fn registry() -> AccountRegistry {
        AccountRegistry::new(Arc::new(InMemoryAccountStore::new()), Arc::new(ManualClock::new(Utc::now())))
    }

    #[tokio::test]
    async fn add_rejects_duplicate_active_username_case_insensitively() {
        let registry = registry();
        registry.add(account("a1", "Alice", 3)).await.unwrap();
        let err = registry.add(account("a2", "ALICE", 3)).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn next_to_scrape_prefers_higher_priority_then_oldest_scrape() {
        let registry = registry();
        registry.add(account("a1", "low", 2)).await.unwrap();
        registry.add(account("a2", "high", 5)).await.unwrap();
        let next = registry.next_to_scrape().unwrap();
        assert_eq!(next.id, "a2");
    }

    #[tokio::test]
    async fn deactivating_an_account_frees_its_username() {
        let registry = registry();
        registry.add(account("a1", "alice", 3)).await.unwrap();
        let mut deactivated = registry.get(&"a1".to_string()).unwrap();
        deactivated.active = false;
        registry.update(deactivated).await.unwrap();
        registry.add(account("a2", "alice", 3)).await.unwrap();
        assert!(registry.get(&"a2".to_string()).is_some());
    }
}
