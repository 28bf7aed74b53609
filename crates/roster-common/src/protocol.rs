//! Wire shapes shared by the HTTP surface and the realtime channel.
//!
//! Every failure response carries an [`ErrorEnvelope`]. Realtime clients
//! receive JSON frames; [`UserEvent`] is the frame pushed when an account
//! changes.

use serde::{Deserialize, Serialize};

// ── Error envelope ──────────────────────────────────────────────────

/// Body of every error response: `{"requestId": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub request_id: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            message: message.into(),
        }
    }
}

// ── Realtime frames ─────────────────────────────────────────────────

/// Account lifecycle notifications broadcast to realtime subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    UserCreated { account: String },
    UserUpdated { account: String },
    UserDeleted { account: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_field_names() {
        let json = serde_json::to_value(ErrorEnvelope::new("req_1", "not found")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "requestId": "req_1", "message": "not found" })
        );
    }

    #[test]
    fn user_event_is_internally_tagged() {
        let json = serde_json::to_value(UserEvent::UserDeleted {
            account: "alice".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "user_deleted", "account": "alice" })
        );
    }
}
