//! Session, user and auth-change event types, plus bearer-token claim decoding.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// User id reported when nobody is signed in.
pub const DEFAULT_USER_ID: &str = "default-user";

/// Seconds before `expires_at` at which a session is already treated as expired.
const EXPIRY_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Signed-in session: bearer credential plus the user it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    /// True when `expires_at` is known and falls within the leeway of `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at
            .map(|exp| exp.saturating_sub(EXPIRY_LEEWAY_SECS) <= now)
            .unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }
}

/// Change pushed by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession(Option<Session>),
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(Session),
}

impl AuthEvent {
    /// Session carried by the event (`None` for sign-out).
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthEvent::InitialSession(s) => s.as_ref(),
            AuthEvent::SignedIn(s) | AuthEvent::TokenRefreshed(s) | AuthEvent::UserUpdated(s) => {
                Some(s)
            }
            AuthEvent::SignedOut => None,
        }
    }
}

/// What subscribers of the session holder see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub session: Option<Session>,
    /// True until the provider answered the initial session query.
    pub loading: bool,
}

impl AuthState {
    pub fn loading() -> Self {
        Self {
            session: None,
            loading: true,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn bearer(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.access_token.clone())
    }

    /// Active user id, or [`DEFAULT_USER_ID`] when signed out.
    pub fn user_id_or_default(&self) -> String {
        self.user()
            .map(|u| u.id.clone())
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string())
    }
}

/// Subset of JWT claims the client cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Decode the (unverified) payload segment of a JWT. Returns None for anything that is not a JWT.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}
