//! Downstream views built on top of [`AuthSession`](crate::auth::AuthSession):
//! profile, activity feed and group memberships.

mod activity;
mod groups;
mod profile;

use thiserror::Error;

use crate::auth::{AuthError, RetryError};
use crate::gitlab::GitlabError;

pub use activity::{Activity, ActivityService};
pub use groups::GroupService;
pub use profile::ProfileService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Gitlab(#[from] GitlabError),
    #[error("GitLab rejected the refreshed session token: {0}")]
    DownstreamAuth(#[source] GitlabError),
}

impl ServiceError {
    /// The user has to log in again before this flow can succeed.
    pub fn requires_login(&self) -> bool {
        match self {
            ServiceError::Auth(err) => err.requires_login(),
            ServiceError::DownstreamAuth(_) => true,
            ServiceError::Gitlab(_) => false,
        }
    }
}

impl From<RetryError<GitlabError>> for ServiceError {
    fn from(err: RetryError<GitlabError>) -> Self {
        match err {
            RetryError::Auth(err) => ServiceError::Auth(err),
            RetryError::Request(err) => ServiceError::Gitlab(err),
            RetryError::StillUnauthorized(err) => ServiceError::DownstreamAuth(err),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
