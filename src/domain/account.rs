//! Account identity and its filtering/change-event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type AccountId = String;

/// Scraping priority. Higher means more frequent (spec §3: 1..=5, higher =
/// more frequent). The constructor rejects anything outside that range so an
/// invalid priority can never reach the scheduler's cadence table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self, String> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!(
                "priority must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            ))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority(1)
    }
}

/// The last failure observed while scraping an account, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A tracked remote profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub display_name: String,
    pub profile_url: String,
    pub priority: Priority,
    pub active: bool,
    pub tags: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub last_error: Option<AccountError>,
}

impl Account {
    /// Case-insensitive comparison, per the uniqueness invariant on `username`.
    pub fn username_matches(&self, other: &str) -> bool {
        self.username.eq_ignore_ascii_case(other)
    }
}

/// Filter applied by `AccountRegistry::list`.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub active: Option<bool>,
    pub priority: Option<Priority>,
    pub tag: Option<String>,
}

impl AccountFilter {
    pub fn matches(&self, account: &Account) -> bool {
        if let Some(active) = self.active {
            if account.active != active {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if account.priority != priority {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !account.tags.contains(tag) {
                return false;
            }
        }
        true
    }
}

/// What kind of mutation produced an [`AccountChanged`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Activated,
    Deactivated,
}

/// Emitted by the Account Registry on every mutation; the scheduler is the
/// sole subscriber (design note #9: break the registry/scheduler cycle via
/// event publication rather than a direct call-back).
#[derive(Debug, Clone)]
pub struct AccountChanged {
    pub account_id: AccountId,
    pub kind: ChangeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rejects_out_of_range() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(6).is_err());
        assert!(Priority::new(1).is_ok());
        assert!(Priority::new(5).is_ok());
    }

    #[test]
    fn username_match_is_case_insensitive() {
        let account = Account {
            id: "a1".into(),
            username: "Alice".into(),
            display_name: "Alice".into(),
            profile_url: "https://example.com/Alice".into(),
            priority: Priority::new(3).unwrap(),
            active: true,
            tags: HashSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_scraped_at: None,
            last_error: None,
        };
        assert!(account.username_matches("alice"));
        assert!(account.username_matches("ALICE"));
        assert!(!account.username_matches("bob"));
    }
}
