use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Locally cached identity of the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub primary_email: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub last_activity_on: String,
}

/// How complete a [`SessionIdentity`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// Every field is set.
    Valid,
    /// No field is set.
    Empty,
    /// Email and/or last activity is missing.
    Partial,
    /// Email and activity are present but another field is not.
    Incomplete,
}

impl SessionIdentity {
    fn fields(&self) -> [&str; 6] {
        [
            &self.name,
            &self.username,
            &self.user_id,
            &self.primary_email,
            &self.avatar,
            &self.last_activity_on,
        ]
    }

    pub fn is_valid(&self) -> bool {
        self.fields().iter().all(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|value| value.is_empty())
    }

    pub fn is_partial(&self) -> bool {
        self.primary_email.is_empty() || self.last_activity_on.is_empty()
    }

    /// Checks are applied in order: valid, empty, partial.
    pub fn classify(&self) -> IdentityState {
        if self.is_valid() {
            IdentityState::Valid
        } else if self.is_empty() {
            IdentityState::Empty
        } else if self.is_partial() {
            IdentityState::Partial
        } else {
            IdentityState::Incomplete
        }
    }
}

/// Process-wide holder of the current [`SessionIdentity`].
#[derive(Debug, Default)]
pub struct IdentityStore {
    inner: RwLock<SessionIdentity>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> SessionIdentity {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, identity: SessionIdentity) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = identity;
    }

    pub fn clear(&self) {
        self.set(SessionIdentity::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> SessionIdentity {
        SessionIdentity {
            name: "Ada Lovelace".into(),
            username: "ada".into(),
            user_id: "42".into(),
            primary_email: "ada@example.com".into(),
            avatar: "https://gitlab.example.com/uploads/ada.png".into(),
            last_activity_on: "2024-05-01".into(),
        }
    }

    #[test]
    fn classify_states() {
        assert_eq!(full().classify(), IdentityState::Valid);
        assert_eq!(SessionIdentity::default().classify(), IdentityState::Empty);

        let mut partial = full();
        partial.primary_email.clear();
        partial.last_activity_on.clear();
        assert_eq!(partial.classify(), IdentityState::Partial);

        let mut incomplete = full();
        incomplete.name.clear();
        assert_eq!(incomplete.classify(), IdentityState::Incomplete);
    }

    #[test]
    fn store_clear_resets_every_field() {
        let store = IdentityStore::new();
        store.set(full());
        assert!(store.get().is_valid());
        store.clear();
        assert!(store.get().is_empty());
    }
}
