//! Scripted [`AuthTransport`] used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use super::{AccessToken, AuthError, AuthTransport, TokenGrant, UserData};

type Reply<T> = Box<dyn Fn() -> Result<T, AuthError> + Send + Sync>;

#[derive(Default)]
pub(crate) struct FakeTransport {
    fetch: Mutex<VecDeque<Reply<AccessToken>>>,
    refresh: Mutex<VecDeque<Reply<AccessToken>>>,
    end: Mutex<VecDeque<Reply<()>>>,
    redirect: Mutex<VecDeque<Reply<Url>>>,
    exchange: Mutex<VecDeque<Reply<TokenGrant>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    exchanged: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fetch_ok(self, token: &'static str) -> Self {
        push(&self.fetch, Box::new(move || Ok(AccessToken::from(token))));
        self
    }

    pub(crate) fn fetch_err(self, err: fn() -> AuthError) -> Self {
        push(&self.fetch, Box::new(move || Err(err())));
        self
    }

    pub(crate) fn refresh_ok(self, token: &'static str) -> Self {
        push(&self.refresh, Box::new(move || Ok(AccessToken::from(token))));
        self
    }

    pub(crate) fn refresh_err(self, err: fn() -> AuthError) -> Self {
        push(&self.refresh, Box::new(move || Err(err())));
        self
    }

    pub(crate) fn end_ok(self) -> Self {
        push(&self.end, Box::new(|| Ok(())));
        self
    }

    pub(crate) fn end_err(self, err: fn() -> AuthError) -> Self {
        push(&self.end, Box::new(move || Err(err())));
        self
    }

    pub(crate) fn redirect_ok(self, url: &'static str) -> Self {
        push(
            &self.redirect,
            Box::new(move || Ok(Url::parse(url).expect("valid test url"))),
        );
        self
    }

    pub(crate) fn exchange_ok(self, token: &'static str, user: UserData) -> Self {
        push(
            &self.exchange,
            Box::new(move || {
                Ok(TokenGrant {
                    access_token: token.to_owned(),
                    user_data: user.clone(),
                })
            }),
        );
        self
    }

    pub(crate) fn exchange_err(self, err: fn() -> AuthError) -> Self {
        push(&self.exchange, Box::new(move || Err(err())));
        self
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn exchanged(&self) -> Vec<(String, String)> {
        self.exchanged.lock().unwrap().clone()
    }

    fn next<T>(&self, op: &'static str, queue: &Mutex<VecDeque<Reply<T>>>) -> Result<T, AuthError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        let reply = queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted call to {op}"));
        reply()
    }
}

fn push<T>(queue: &Mutex<VecDeque<Reply<T>>>, reply: Reply<T>) {
    queue.lock().unwrap().push_back(reply);
}

#[async_trait]
impl AuthTransport for FakeTransport {
    async fn fetch_session_token(&self) -> Result<AccessToken, AuthError> {
        self.next("fetch", &self.fetch)
    }

    async fn refresh_session_token(&self) -> Result<AccessToken, AuthError> {
        self.next("refresh", &self.refresh)
    }

    async fn end_session(&self) -> Result<(), AuthError> {
        self.next("end", &self.end)
    }

    async fn request_oauth_redirect(
        &self,
        _state: &str,
        _code_challenge: &str,
    ) -> Result<Url, AuthError> {
        self.next("redirect", &self.redirect)
    }

    async fn exchange_authorization_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<TokenGrant, AuthError> {
        self.exchanged
            .lock()
            .unwrap()
            .push((code.to_owned(), verifier.to_owned()));
        self.next("exchange", &self.exchange)
    }
}
