//! Shared application state.

use std::sync::Arc;

use roster_common::auth::TokenAuthority;

use crate::registry::ConnectionRegistry;
use crate::store::UserStore;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    authority: TokenAuthority,
    /// Live realtime connections, keyed by connection ID.
    registry: ConnectionRegistry,
    users: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(authority: TokenAuthority, users: Arc<dyn UserStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                authority,
                registry: ConnectionRegistry::new(),
                users,
            }),
        }
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.inner.authority
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn users(&self) -> &dyn UserStore {
        self.inner.users.as_ref()
    }
}
