use std::time::Duration as StdDuration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::MediatorEndpoints;

use super::{AccessToken, AuthError, FaultKind};

const USER_AGENT: &str = "tokenmed/0.1.0";
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Network operations offered by the token mediating back-end.
///
/// Implementations never retry; every call is a single round trip.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Read the token bound to the current back-end session.
    async fn fetch_session_token(&self) -> Result<AccessToken, AuthError>;
    /// Ask the back-end to mint a new token for the current session.
    async fn refresh_session_token(&self) -> Result<AccessToken, AuthError>;
    /// Destroy the back-end session.
    async fn end_session(&self) -> Result<(), AuthError>;
    /// Obtain the identity provider URL to send the user to.
    async fn request_oauth_redirect(
        &self,
        state: &str,
        code_challenge: &str,
    ) -> Result<Url, AuthError>;
    /// Trade an authorization code (plus PKCE verifier) for a token and identity claims.
    async fn exchange_authorization_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<TokenGrant, AuthError>;
}

/// Payload returned by the code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub user_data: UserData,
}

/// Identity claims extracted by the back-end from the OpenID id_token.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub picture: String,
}

/// Mediator route, used to pick the status classification rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediatorCall {
    Verify,
    Refresh,
    Logout,
    Login,
    Token,
}

/// Map the special-cased statuses of a mediator call onto typed errors.
///
/// Every status not listed falls through to body parsing.
pub fn classify_status(call: MediatorCall, status: StatusCode) -> Result<(), AuthError> {
    match (call, status) {
        (_, StatusCode::INTERNAL_SERVER_ERROR) => Err(AuthError::ServerFault(FaultKind::Internal)),
        (MediatorCall::Verify, StatusCode::UNAUTHORIZED) => Err(AuthError::NoSession),
        (MediatorCall::Refresh, StatusCode::UNAUTHORIZED) => Err(AuthError::RefreshFailed),
        (MediatorCall::Login | MediatorCall::Token, StatusCode::BAD_REQUEST) => {
            Err(AuthError::BadRequest)
        }
        _ => Ok(()),
    }
}

/// [`AuthTransport`] speaking HTTP to the mediator, with a cookie jar standing
/// in for the browser's credential inclusion.
#[derive(Debug, Clone)]
pub struct HttpAuthTransport {
    http: Client,
    endpoints: MediatorEndpoints,
}

impl HttpAuthTransport {
    pub fn new(endpoints: MediatorEndpoints) -> Result<Self, AuthError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, endpoints })
    }

    async fn read_token(
        &self,
        call: MediatorCall,
        response: reqwest::Response,
    ) -> Result<AccessToken, AuthError> {
        let status = response.status();
        debug!(?call, %status, "token mediator responded");
        classify_status(call, status)?;

        let body = response.text().await?;
        parse_token_body(&body)
    }
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedirectBody {
    url: String,
}

fn parse_token_body(body: &str) -> Result<AccessToken, AuthError> {
    serde_json::from_str::<TokenBody>(body)
        .ok()
        .and_then(|payload| payload.access_token)
        .filter(|token| !token.is_empty())
        .map(AccessToken::from)
        .ok_or(AuthError::ServerFault(FaultKind::MalformedResponse))
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn fetch_session_token(&self) -> Result<AccessToken, AuthError> {
        let response = self
            .http
            .get(self.endpoints.verify.clone())
            .send()
            .await?;
        self.read_token(MediatorCall::Verify, response).await
    }

    async fn refresh_session_token(&self) -> Result<AccessToken, AuthError> {
        let response = self
            .http
            .post(self.endpoints.refresh.clone())
            .send()
            .await?;
        self.read_token(MediatorCall::Refresh, response).await
    }

    async fn end_session(&self) -> Result<(), AuthError> {
        let response = self
            .http
            .delete(self.endpoints.logout.clone())
            .send()
            .await?;
        let status = response.status();
        debug!(call = ?MediatorCall::Logout, %status, "token mediator responded");
        classify_status(MediatorCall::Logout, status)
    }

    async fn request_oauth_redirect(
        &self,
        state: &str,
        code_challenge: &str,
    ) -> Result<Url, AuthError> {
        let mut url = self.endpoints.login.clone();
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        debug!(call = ?MediatorCall::Login, %status, "token mediator responded");
        classify_status(MediatorCall::Login, status)?;

        let body = response.text().await?;
        let payload: RedirectBody = serde_json::from_str(&body)?;
        Ok(Url::parse(&payload.url)?)
    }

    async fn exchange_authorization_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<TokenGrant, AuthError> {
        let form = [("code", code), ("code_verifier", verifier)];
        let response = self
            .http
            .post(self.endpoints.token.clone())
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        debug!(call = ?MediatorCall::Token, %status, "token mediator responded");
        classify_status(MediatorCall::Token, status)?;

        let body = response.text().await?;
        let grant: TokenGrant = serde_json::from_str(&body)?;
        if grant.access_token.is_empty() {
            return Err(AuthError::ServerFault(FaultKind::MalformedResponse));
        }
        Ok(grant)
    }
}
