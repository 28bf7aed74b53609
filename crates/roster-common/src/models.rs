//! Data models for the roster service.
//!
//! These types are what the HTTP layer serializes; credentials never appear
//! in them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── User ────────────────────────────────────────────────────────────

/// A registered user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Account name; unique and immutable.
    pub acct: String,
    pub fullname: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to insert a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub acct: String,
    pub password_hash: String,
    pub fullname: String,
}

/// Partial update of a user. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub password_hash: Option<String>,
    pub fullname: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.password_hash.is_none() && self.fullname.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serializes_camel_case() {
        let now = Utc::now();
        let user = User {
            acct: "alice".into(),
            fullname: "Alice Liddell".into(),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["acct"], "alice");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("created_at").is_none());
    }

    #[test]
    fn empty_changes() {
        assert!(UserChanges::default().is_empty());
        let changes = UserChanges {
            fullname: Some("x".into()),
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }
}
