//! In-memory reference implementations of the persistence ports.

use super::{AccountStore, AlertStore};
use crate::domain::account::AccountId;
use crate::domain::{Account, AlertRule};
use crate::error::EngineResult;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<AccountId, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn load_all(&self) -> EngineResult<Vec<Account>> {
        Ok(self.accounts.iter().map(|e| e.value().clone()).collect())
    }

    async fn upsert(&self, account: &Account) -> EngineResult<()> {
        self.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn delete(&self, id: &AccountId) -> EngineResult<()> {
        self.accounts.remove(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAlertStore {
    rules: DashMap<String, AlertRule>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn load_all(&self) -> EngineResult<Vec<AlertRule>> {
        Ok(self.rules.iter().map(|e| e.value().clone()).collect())
    }

    async fn upsert(&self, rule: &AlertRule) -> EngineResult<()> {
        self.rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        self.rules.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Priority;
    use chrono::Utc;
    use std::collections::HashSet;

    fn account(id: &str) -> Account {
        Account {
            id: id.into(),
            username: id.into(),
            display_name: id.into(),
            profile_url: format!("https://example.com/{id}"),
            priority: Priority::new(3).unwrap(),
            active: true,
            tags: HashSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_scraped_at: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_load_all_round_trips() {
        let store = InMemoryAccountStore::new();
        store.upsert(&account("a1")).await.unwrap();
        store.upsert(&account("a2")).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_the_account() {
        let store = InMemoryAccountStore::new();
        store.upsert(&account("a1")).await.unwrap();
        store.delete(&"a1".to_string()).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
