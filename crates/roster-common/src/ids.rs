//! Prefixed ID generation.
//!
//! IDs are a short `prefix_` followed by a UUIDv7 (time-ordered), so they
//! sort by creation time and are recognisable in logs at a glance.

use uuid::Uuid;

/// Generate a prefixed ID using UUIDv7.
fn prefixed_id(prefix: &str) -> String {
    let id = Uuid::now_v7();
    format!("{}_{}", prefix, id.as_simple())
}

/// Generate a request correlation ID: `req_<uuid7>`
pub fn request_id() -> String {
    prefixed_id("req")
}

/// Generate a realtime connection ID: `con_<uuid7>`
pub fn connection_id() -> String {
    prefixed_id("con")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_correct_prefix() {
        assert!(request_id().starts_with("req_"));
        assert!(connection_id().starts_with("con_"));
    }

    #[test]
    fn ids_are_unique() {
        let a = connection_id();
        let b = connection_id();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_sortable_by_time() {
        let a = request_id();
        let b = request_id();
        assert!(b > a, "Expected {b} > {a}");
    }
}
