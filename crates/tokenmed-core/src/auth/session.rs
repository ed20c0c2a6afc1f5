use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::retry::{DownstreamFailure, RetryError, MAX_REFRESH_RETRIES};
use super::{AccessToken, AuthError, AuthTransport, SessionContext, SessionIdentity};

/// Coordinates the token lifecycle: session discovery, refresh, callback
/// completion and logout.
///
/// There is no explicit state field. A non-empty token in the store means
/// "has local token"; nothing is claimed about its validity upstream.
#[derive(Clone)]
pub struct AuthSession {
    transport: Arc<dyn AuthTransport>,
    context: SessionContext,
}

impl AuthSession {
    pub fn new(transport: Arc<dyn AuthTransport>, context: SessionContext) -> Self {
        Self { transport, context }
    }

    pub fn transport(&self) -> &Arc<dyn AuthTransport> {
        &self.transport
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn current_token(&self) -> AccessToken {
        self.context.tokens().get()
    }

    pub fn has_local_token(&self) -> bool {
        !self.current_token().is_empty()
    }

    /// Make sure a token is held locally, asking the back-end only when none is.
    ///
    /// Returns [`AuthError::NoSession`] untouched when the back-end has no session.
    pub async fn ensure_session(&self) -> Result<(), AuthError> {
        if self.has_local_token() {
            return Ok(());
        }
        debug!("no local token, asking token mediator for the session token");
        let token = self.transport.fetch_session_token().await?;
        self.context.tokens().set(token);
        info!("session token established");
        Ok(())
    }

    /// Fetch a new token for the current back-end session.
    ///
    /// A rejected refresh leaves the previous token in place and surfaces as
    /// [`AuthError::ReloginRequired`].
    pub async fn refresh(&self) -> Result<(), AuthError> {
        match self.transport.refresh_session_token().await {
            Ok(token) => {
                self.context.tokens().set(token);
                info!("access token refreshed");
                Ok(())
            }
            Err(AuthError::RefreshFailed) => {
                warn!("token mediator refused refresh, login required");
                Err(AuthError::ReloginRequired)
            }
            Err(err) => Err(err),
        }
    }

    /// Finish the OAuth round trip and cache the identity it carries.
    pub async fn complete_callback(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<SessionIdentity, AuthError> {
        let grant = self
            .transport
            .exchange_authorization_code(code, verifier)
            .await?;
        self.context.tokens().set(AccessToken::from(grant.access_token));

        // The id_token carries no email or activity date, so this is partial.
        let user = grant.user_data;
        let identity = SessionIdentity {
            name: user.name,
            username: user.preferred_username,
            user_id: user.sub,
            avatar: user.picture,
            ..SessionIdentity::default()
        };
        self.context.identity().set(identity.clone());
        info!(username = %identity.username, "login completed");
        Ok(identity)
    }

    /// End the back-end session and clear local state.
    ///
    /// Local state is cleared even when the back-end reports a fault; the fault
    /// is still returned so it can be shown.
    pub async fn terminate(&self) -> Result<(), AuthError> {
        let result = self.transport.end_session().await;
        self.context.tokens().set(AccessToken::empty());
        self.context.identity().clear();
        match &result {
            Ok(()) => info!("session terminated"),
            Err(err) => warn!(error = %err, "logout failed upstream, local session cleared"),
        }
        result
    }

    /// Run a downstream request, refreshing the token and retrying once if the
    /// downstream API rejects it.
    pub async fn call_with_refresh<R, E, F, Fut>(
        &self,
        mut request: F,
    ) -> Result<R, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: DownstreamFailure,
    {
        let mut refreshes = 0;
        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_auth_failure() => {
                    if refreshes >= MAX_REFRESH_RETRIES {
                        warn!(error = %err, "downstream API rejected refreshed token");
                        return Err(RetryError::StillUnauthorized(err));
                    }
                    refreshes += 1;
                    warn!(error = %err, "downstream API rejected token, refreshing");
                    self.refresh().await?;
                }
                Err(err) => return Err(RetryError::Request(err)),
            }
        }
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
