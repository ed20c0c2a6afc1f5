use tracing::debug;

use crate::auth::{AuthSession, IdentityState, SessionIdentity};
use crate::gitlab::{ensure_absolute_url, FullProfile, GitlabClient};

use super::ServiceResult;

/// Loads the signed-in user's profile, fetching only what the cached identity
/// is missing.
#[derive(Debug, Clone)]
pub struct ProfileService {
    session: AuthSession,
    client: GitlabClient,
}

impl ProfileService {
    pub fn new(session: AuthSession, client: GitlabClient) -> Self {
        Self { session, client }
    }

    pub async fn load_profile(&self) -> ServiceResult<SessionIdentity> {
        self.session.ensure_session().await?;

        let stored = self.session.context().identity().get();
        let state = stored.classify();
        debug!(?state, "loading profile");
        match state {
            IdentityState::Valid => Ok(stored),
            IdentityState::Empty | IdentityState::Incomplete => self.load_full().await,
            IdentityState::Partial => self.complete_partial(stored).await,
        }
    }

    async fn load_full(&self) -> ServiceResult<SessionIdentity> {
        let client = &self.client;
        let profile = self
            .session
            .call_with_refresh(move || client.current_user_full())
            .await?;

        let identity = self.identity_from_full(profile);
        self.session.context().identity().set(identity.clone());
        Ok(identity)
    }

    async fn complete_partial(&self, stored: SessionIdentity) -> ServiceResult<SessionIdentity> {
        let client = &self.client;
        let partial = self
            .session
            .call_with_refresh(move || client.current_user_partial())
            .await?;

        let identity = SessionIdentity {
            primary_email: partial.primary_email().unwrap_or_default(),
            last_activity_on: partial.last_activity_on.unwrap_or_default(),
            ..stored
        };
        self.session.context().identity().set(identity.clone());
        Ok(identity)
    }

    fn identity_from_full(&self, profile: FullProfile) -> SessionIdentity {
        let avatar = profile
            .avatar_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|url| ensure_absolute_url(url, self.client.absolute_base()))
            .unwrap_or_default();

        SessionIdentity {
            user_id: profile.numeric_id().to_owned(),
            primary_email: profile.primary_email().unwrap_or_default(),
            name: profile.name.unwrap_or_default(),
            username: profile.username.unwrap_or_default(),
            avatar,
            last_activity_on: profile.last_activity_on.unwrap_or_default(),
        }
    }
}
