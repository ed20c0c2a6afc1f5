mod context;
pub mod ephemeral;
mod error;
mod identity;
mod login;
mod pkce;
mod retry;
mod session;
mod token_store;
mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use context::SessionContext;
pub use ephemeral::{EphemeralStore, FileEphemeralStore, MemoryEphemeralStore};
pub use error::{AuthError, FaultKind};
pub use identity::{IdentityState, IdentityStore, SessionIdentity};
pub use login::LoginFlow;
pub use pkce::{generate_state, PkcePair};
pub use retry::{DownstreamFailure, RetryError, MAX_REFRESH_RETRIES};
pub use session::AuthSession;
pub use token_store::{AccessToken, MemoryTokenStore, TokenStore};
pub use transport::{
    classify_status, AuthTransport, HttpAuthTransport, MediatorCall, TokenGrant, UserData,
};
