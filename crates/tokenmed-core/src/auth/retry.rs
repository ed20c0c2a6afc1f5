use thiserror::Error;

use super::AuthError;

/// Number of refresh-then-retry rounds allowed for a single request.
pub const MAX_REFRESH_RETRIES: u32 = 1;

/// Errors from a downstream resource API that may signal a stale token.
pub trait DownstreamFailure: std::error::Error + 'static {
    /// The downstream API rejected the bearer token (its own 401).
    fn is_auth_failure(&self) -> bool;
}

/// Outcome of a request wrapped in the refresh-and-retry contract.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Refreshing the token failed, usually meaning the user must log in again.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The request failed for a reason unrelated to authentication.
    #[error(transparent)]
    Request(E),
    /// The request was still unauthorized after the token was refreshed.
    #[error("downstream API rejected the refreshed token: {0}")]
    StillUnauthorized(#[source] E),
}
