use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;

/// Flavour of a back-end fault reported by the token mediator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The mediator answered with HTTP 500.
    Internal,
    /// The mediator answered, but the body lacked the expected fields.
    MalformedResponse,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            FaultKind::Internal => "the server had a problem",
            FaultKind::MalformedResponse => "the server did not respond as expected",
        };
        write!(f, "{value}")
    }
}

/// Errors surfaced by authentication and session management routines.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no session found on the token mediator")]
    NoSession,
    #[error("token mediator refused to refresh the session")]
    RefreshFailed,
    #[error("session expired, please log in again")]
    ReloginRequired,
    #[error("token mediator fault: {0}")]
    ServerFault(FaultKind),
    #[error("the request did not fulfill the server requirements")]
    BadRequest,
    #[error("OAuth callback rejected: {0}")]
    CallbackValidation(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to launch system browser: {0}")]
    BrowserLaunch(String),
    #[error("authorization flow cancelled")]
    Cancelled,
}

impl AuthError {
    /// Whether the caller must send the user through the login flow again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::NoSession | AuthError::RefreshFailed | AuthError::ReloginRequired
        )
    }

    pub(crate) fn callback(reason: impl Into<String>) -> Self {
        AuthError::CallbackValidation(reason.into())
    }
}
