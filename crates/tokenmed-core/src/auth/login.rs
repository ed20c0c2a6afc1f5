use std::future::Future;

use tracing::{debug, warn};
use url::Url;

use super::ephemeral::{EphemeralStore, STATE_KEY, VERIFIER_KEY};
use super::pkce::{generate_state, PkcePair};
use super::{AuthError, AuthSession, SessionIdentity};

/// PKCE login round trip: redirect to the identity provider, then validate and
/// complete the callback.
pub struct LoginFlow<'a> {
    session: &'a AuthSession,
    storage: &'a dyn EphemeralStore,
}

impl<'a> LoginFlow<'a> {
    pub fn new(session: &'a AuthSession, storage: &'a dyn EphemeralStore) -> Self {
        Self { session, storage }
    }

    /// Generate PKCE material, ask the mediator for the provider URL and
    /// remember the state/verifier for the callback.
    pub async fn begin(&self) -> Result<Url, AuthError> {
        let state = generate_state();
        let pkce = PkcePair::generate();
        let url = self
            .session
            .transport()
            .request_oauth_redirect(&state, pkce.challenge())
            .await?;

        self.storage.set(STATE_KEY, &state)?;
        self.storage.set(VERIFIER_KEY, pkce.verifier())?;
        debug!(host = url.host_str().unwrap_or_default(), "login redirect prepared");
        Ok(url)
    }

    /// Validate the provider's redirect back to us and exchange its code.
    ///
    /// The stored state and verifier are consumed before validation, so a
    /// rejected callback cannot be replayed.
    pub async fn handle_callback(&self, callback: &Url) -> Result<SessionIdentity, AuthError> {
        let stored_state = self.storage.take(STATE_KEY)?;
        let stored_verifier = self.storage.take(VERIFIER_KEY)?;
        let params = CallbackParams::from_url(callback);

        let validated = validate(params, stored_state, stored_verifier);
        let (code, verifier) = match validated {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "OAuth callback rejected");
                return Err(err);
            }
        };

        self.session.complete_callback(&code, &verifier).await
    }

    /// Run the whole login interactively: announce (and optionally open) the
    /// provider URL, then read the redirect URL the user pastes back.
    pub async fn run_interactive<Notify, Input, Fut>(
        &self,
        open_browser: bool,
        notify_authorization_url: Notify,
        mut read_input: Input,
    ) -> Result<SessionIdentity, AuthError>
    where
        Notify: Fn(&Url) -> Result<(), AuthError>,
        Input: FnMut() -> Fut,
        Fut: Future<Output = Result<String, AuthError>>,
    {
        let auth_url = self.begin().await?;

        let callback = async {
            notify_authorization_url(&auth_url)?;
            if open_browser {
                open::that(auth_url.as_str())
                    .map_err(|err| AuthError::BrowserLaunch(err.to_string()))?;
            }
            let raw = read_input().await?;
            parse_callback_input(raw.trim())
        }
        .await;

        match callback {
            Ok(callback) => self.handle_callback(&callback).await,
            Err(err) => {
                self.abandon();
                Err(err)
            }
        }
    }

    /// Drop the pending state and verifier of a login that never reached its callback.
    fn abandon(&self) {
        for key in [STATE_KEY, VERIFIER_KEY] {
            if let Err(err) = self.storage.remove(key) {
                warn!(key, error = %err, "could not discard pending login data");
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackParams {
    fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

fn validate(
    params: CallbackParams,
    stored_state: Option<String>,
    stored_verifier: Option<String>,
) -> Result<(String, String), AuthError> {
    if let Some(err) = params.error {
        return Err(AuthError::callback(format!("provider returned '{err}'")));
    }
    let stored_state = non_empty(stored_state)
        .ok_or_else(|| AuthError::callback("no login in progress"))?;
    let received_state =
        non_empty(params.state).ok_or_else(|| AuthError::callback("missing state parameter"))?;
    let code = non_empty(params.code).ok_or_else(|| AuthError::callback("missing code parameter"))?;
    if received_state != stored_state {
        return Err(AuthError::callback("state mismatch"));
    }
    let verifier =
        non_empty(stored_verifier).ok_or_else(|| AuthError::callback("missing PKCE verifier"))?;
    Ok((code, verifier))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_callback_input(input: &str) -> Result<Url, AuthError> {
    if input.is_empty() {
        return Err(AuthError::callback("empty input"));
    }
    Url::parse(input).map_err(|_| AuthError::callback("expected the full redirect URL"))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::auth::ephemeral::MemoryEphemeralStore;
    use crate::auth::fake::FakeTransport;
    use crate::auth::{SessionContext, UserData};

    fn login_session(transport: FakeTransport) -> (Arc<FakeTransport>, AuthSession) {
        let transport = Arc::new(transport);
        let session = AuthSession::new(transport.clone(), SessionContext::in_memory());
        (transport, session)
    }

    fn user() -> UserData {
        UserData {
            name: "Ada".into(),
            preferred_username: "ada".into(),
            sub: "7".into(),
            picture: String::new(),
        }
    }

    fn callback(query: &str) -> Url {
        Url::parse(&format!("https://app.example.com/callback?{query}")).unwrap()
    }

    #[tokio::test]
    async fn begin_stores_state_and_verifier() {
        let (_, session) =
            login_session(FakeTransport::new().redirect_ok("https://gitlab.example.com/oauth/authorize"));
        let storage = MemoryEphemeralStore::new();

        let url = LoginFlow::new(&session, &storage).begin().await.unwrap();

        assert_eq!(url.host_str(), Some("gitlab.example.com"));
        assert_eq!(storage.get(STATE_KEY).unwrap().unwrap().len(), 43);
        assert!(storage.get(VERIFIER_KEY).unwrap().unwrap().len() >= 43);
    }

    #[tokio::test]
    async fn matching_callback_exchanges_code() {
        let (transport, session) = login_session(FakeTransport::new().exchange_ok("granted", user()));
        let storage = MemoryEphemeralStore::new();
        storage.set(STATE_KEY, "nonce").unwrap();
        storage.set(VERIFIER_KEY, "verifier-1").unwrap();

        let identity = LoginFlow::new(&session, &storage)
            .handle_callback(&callback("code=abc&state=nonce"))
            .await
            .unwrap();

        assert_eq!(identity.username, "ada");
        assert_eq!(session.current_token().as_str(), "granted");
        assert_eq!(
            transport.exchanged(),
            vec![("abc".to_string(), "verifier-1".to_string())]
        );
        assert!(storage.get(STATE_KEY).unwrap().is_none());
        assert!(storage.get(VERIFIER_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn state_mismatch_erases_keys() {
        let (transport, session) = login_session(FakeTransport::new());
        let storage = MemoryEphemeralStore::new();
        storage.set(STATE_KEY, "nonce").unwrap();
        storage.set(VERIFIER_KEY, "verifier-1").unwrap();

        let err = LoginFlow::new(&session, &storage)
            .handle_callback(&callback("code=abc&state=forged"))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::CallbackValidation(_)));
        assert!(storage.get(STATE_KEY).unwrap().is_none());
        assert!(storage.get(VERIFIER_KEY).unwrap().is_none());
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn missing_parameters_rejected() {
        for query in ["state=nonce", "code=abc", "error=access_denied&state=nonce"] {
            let (_, session) = login_session(FakeTransport::new());
            let storage = MemoryEphemeralStore::new();
            storage.set(STATE_KEY, "nonce").unwrap();
            storage.set(VERIFIER_KEY, "verifier-1").unwrap();

            let err = LoginFlow::new(&session, &storage)
                .handle_callback(&callback(query))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::CallbackValidation(_)), "{query}");
            assert!(storage.get(VERIFIER_KEY).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn callback_without_login_in_progress() {
        let (_, session) = login_session(FakeTransport::new());
        let storage = MemoryEphemeralStore::new();

        let err = LoginFlow::new(&session, &storage)
            .handle_callback(&callback("code=abc&state=nonce"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CallbackValidation(_)));
    }

    #[tokio::test]
    async fn interactive_flow_round_trip() {
        let (_, session) = login_session(
            FakeTransport::new()
                .redirect_ok("https://gitlab.example.com/oauth/authorize")
                .exchange_ok("granted", user()),
        );
        let storage = MemoryEphemeralStore::new();
        let seen = Arc::new(Mutex::new(None));

        let notify = {
            let seen = seen.clone();
            move |url: &Url| {
                *seen.lock().unwrap() = Some(url.clone());
                Ok(())
            }
        };
        let read_input = {
            let flow_storage: &MemoryEphemeralStore = &storage;
            move || {
                let state = flow_storage.get(STATE_KEY).unwrap().unwrap_or_default();
                async move {
                    Ok(format!(
                        "https://app.example.com/callback?code=abc&state={state}"
                    ))
                }
            }
        };

        let identity = LoginFlow::new(&session, &storage)
            .run_interactive(false, notify, read_input)
            .await
            .unwrap();

        assert!(seen.lock().unwrap().is_some());
        assert_eq!(identity.user_id, "7");
    }

    #[tokio::test]
    async fn interactive_flow_rejects_raw_code() {
        let (_, session) = login_session(
            FakeTransport::new().redirect_ok("https://gitlab.example.com/oauth/authorize"),
        );
        let storage = MemoryEphemeralStore::new();

        let err = LoginFlow::new(&session, &storage)
            .run_interactive(false, |_| Ok(()), || async { Ok("raw-code".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CallbackValidation(_)));
        assert!(storage.get(STATE_KEY).unwrap().is_none());
        assert!(storage.get(VERIFIER_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_input_discards_pending_login() {
        let (transport, session) = login_session(
            FakeTransport::new().redirect_ok("https://gitlab.example.com/oauth/authorize"),
        );
        let storage = MemoryEphemeralStore::new();

        let err = LoginFlow::new(&session, &storage)
            .run_interactive(false, |_| Ok(()), || async { Err(AuthError::Cancelled) })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
        assert!(storage.get(STATE_KEY).unwrap().is_none());
        assert!(storage.get(VERIFIER_KEY).unwrap().is_none());
        assert_eq!(transport.calls("exchange"), 0);
    }

    #[tokio::test]
    async fn failed_notification_discards_pending_login() {
        let (_, session) = login_session(
            FakeTransport::new().redirect_ok("https://gitlab.example.com/oauth/authorize"),
        );
        let storage = MemoryEphemeralStore::new();

        let err = LoginFlow::new(&session, &storage)
            .run_interactive(
                false,
                |_| Err(AuthError::BrowserLaunch("no display".into())),
                || async { Ok(String::new()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BrowserLaunch(_)));
        assert!(storage.get(STATE_KEY).unwrap().is_none());
        assert!(storage.get(VERIFIER_KEY).unwrap().is_none());
    }
}
