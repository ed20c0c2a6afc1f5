use std::fmt;
use std::sync::RwLock;

/// Opaque bearer token handed out by the token mediator.
///
/// An empty value means "no session". The client never tracks expiry; a stale
/// token is only discovered when a downstream API rejects it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value for an `Authorization` header, if there is a token to send.
    pub fn bearer_header(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.0))
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("AccessToken(<empty>)")
        } else {
            f.write_str("AccessToken(<redacted>)")
        }
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// In-process holder of the current access token.
pub trait TokenStore: Send + Sync {
    /// Last value set, or an empty token.
    fn get(&self) -> AccessToken;
    /// Overwrite the stored token; visible to every subsequent `get`.
    fn set(&self, token: AccessToken);
}

/// Default [`TokenStore`] keeping the token in memory for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: RwLock<AccessToken>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> AccessToken {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set(&self, token: AccessToken) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = token;
    }
}
