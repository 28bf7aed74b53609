//! Persistence seam for user accounts.
//!
//! Handlers only see [`UserStore`]. [`crate::db::PgUserStore`] is the
//! PostgreSQL implementation; [`MemoryUserStore`] backs tests and
//! database-less runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use roster_common::models::{NewUser, User, UserChanges};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {0} already exists")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// All users ordered by account, optionally filtered by a case-insensitive
    /// substring of the full name.
    async fn list(&self, fullname: Option<&str>) -> Result<Vec<User>, StoreError>;

    async fn get(&self, account: &str) -> Result<Option<User>, StoreError>;

    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Apply `changes`; returns `None` when the account does not exist.
    async fn update(&self, account: &str, changes: UserChanges) -> Result<Option<User>, StoreError>;

    /// Returns whether a row was deleted.
    async fn delete(&self, account: &str) -> Result<bool, StoreError>;

    /// Stored password hash, for credential checks.
    async fn password_hash(&self, account: &str) -> Result<Option<String>, StoreError>;
}

// ── In-memory store ─────────────────────────────────────────────────

struct StoredUser {
    password_hash: String,
    fullname: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredUser {
    fn to_user(&self, acct: &str) -> User {
        User {
            acct: acct.to_string(),
            fullname: self.fullname.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<BTreeMap<String, StoredUser>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn list(&self, fullname: Option<&str>) -> Result<Vec<User>, StoreError> {
        let needle = fullname.map(str::to_lowercase);
        let users = self.users.read().await;
        Ok(users
            .iter()
            .filter(|(_, u)| {
                needle
                    .as_deref()
                    .is_none_or(|n| u.fullname.to_lowercase().contains(n))
            })
            .map(|(acct, u)| u.to_user(acct))
            .collect())
    }

    async fn get(&self, account: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(account).map(|u| u.to_user(account)))
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.acct) {
            return Err(StoreError::Duplicate(user.acct));
        }
        let now = Utc::now();
        let stored = StoredUser {
            password_hash: user.password_hash,
            fullname: user.fullname,
            created_at: now,
            updated_at: now,
        };
        let created = stored.to_user(&user.acct);
        users.insert(user.acct, stored);
        Ok(created)
    }

    async fn update(&self, account: &str, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(stored) = users.get_mut(account) else {
            return Ok(None);
        };
        if let Some(hash) = changes.password_hash {
            stored.password_hash = hash;
        }
        if let Some(fullname) = changes.fullname {
            stored.fullname = fullname;
        }
        stored.updated_at = Utc::now();
        Ok(Some(stored.to_user(account)))
    }

    async fn delete(&self, account: &str) -> Result<bool, StoreError> {
        Ok(self.users.write().await.remove(account).is_some())
    }

    async fn password_hash(&self, account: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .get(account)
            .map(|u| u.password_hash.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(acct: &str, fullname: &str) -> NewUser {
        NewUser {
            acct: acct.into(),
            password_hash: format!("hash-{acct}"),
            fullname: fullname.into(),
        }
    }

    #[tokio::test]
    async fn create_get_and_duplicate() {
        let store = MemoryUserStore::new();
        let created = store.create(new_user("alice", "Alice Liddell")).await.unwrap();
        assert_eq!(created.acct, "alice");

        let fetched = store.get("alice").await.unwrap().unwrap();
        assert_eq!(fetched, created);

        assert!(matches!(
            store.create(new_user("alice", "Other")).await,
            Err(StoreError::Duplicate(acct)) if acct == "alice"
        ));
    }

    #[tokio::test]
    async fn list_filters_by_fullname() {
        let store = MemoryUserStore::new();
        store.create(new_user("bob", "Bob Builder")).await.unwrap();
        store.create(new_user("alice", "Alice Liddell")).await.unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(
            all.iter().map(|u| u.acct.as_str()).collect::<Vec<_>>(),
            ["alice", "bob"]
        );

        let filtered = store.list(Some("build")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].acct, "bob");
    }

    #[tokio::test]
    async fn update_and_delete() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice", "Alice")).await.unwrap();

        let changes = UserChanges {
            fullname: Some("Alice L.".into()),
            password_hash: Some("new-hash".into()),
        };
        let updated = store.update("alice", changes).await.unwrap().unwrap();
        assert_eq!(updated.fullname, "Alice L.");
        assert!(updated.updated_at >= updated.created_at);
        assert_eq!(
            store.password_hash("alice").await.unwrap().as_deref(),
            Some("new-hash")
        );

        assert!(store
            .update("nobody", UserChanges::default())
            .await
            .unwrap()
            .is_none());

        assert!(store.delete("alice").await.unwrap());
        assert!(!store.delete("alice").await.unwrap());
        assert!(store.get("alice").await.unwrap().is_none());
    }
}
