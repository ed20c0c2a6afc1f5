use std::sync::Arc;

use super::{IdentityStore, MemoryTokenStore, TokenStore};

/// Shared session state, built once at startup and handed to every component
/// that reads or writes the token or the cached identity.
#[derive(Clone)]
pub struct SessionContext {
    tokens: Arc<dyn TokenStore>,
    identity: Arc<IdentityStore>,
}

impl SessionContext {
    pub fn new(tokens: Arc<dyn TokenStore>, identity: Arc<IdentityStore>) -> Self {
        Self { tokens, identity }
    }

    /// Fresh context with empty in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(IdentityStore::new()),
        )
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn identity(&self) -> &Arc<IdentityStore> {
        &self.identity
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("token", &self.tokens.get())
            .field("identity", &self.identity.get().classify())
            .finish()
    }
}
