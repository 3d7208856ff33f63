//! Identity provider seam: produces a bearer session and pushes auth-change events.

use crate::auth::session::{AuthEvent, Session, User};
use async_trait::async_trait;
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("auth api error: {status} {body}")]
    Api { status: u16, body: String },
    #[error("not signed in")]
    NoSession,
    #[error("auth response missing {0}")]
    Malformed(&'static str),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session, restoring (and refreshing, when expired) a persisted one if needed.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Session, AuthError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError>;

    /// Ask the provider who the access token belongs to.
    async fn fetch_user(&self, access_token: &str) -> Result<User, AuthError>;

    /// End the session. Local state is cleared even when the remote call fails.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Auth-change events pushed after subscription.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
