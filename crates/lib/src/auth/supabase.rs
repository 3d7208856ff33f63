//! Supabase (GoTrue) identity provider over HTTP.
//!
//! Password sign-in and refresh use `POST /auth/v1/token?grant_type=...`; the anon key is sent as
//! `apikey` on every call. The session is kept in memory, mirrored to a [`SessionFile`] when one
//! is configured, and every change is broadcast as an [`AuthEvent`].

use crate::auth::provider::{AuthError, IdentityProvider};
use crate::auth::session::{decode_claims, AuthEvent, Session, User};
use crate::auth::store::SessionFile;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

const EVENT_CAPACITY: usize = 16;

pub struct SupabaseAuth {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
    current: RwLock<Option<Session>>,
    file: Option<SessionFile>,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<UserResponse>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<Value>,
}

impl From<UserResponse> for User {
    fn from(u: UserResponse) -> Self {
        let display_name = u.user_metadata.as_ref().and_then(|m| {
            m.get("full_name")
                .or_else(|| m.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        User {
            id: u.id,
            email: u.email,
            display_name,
        }
    }
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Result<Session, AuthError> {
        let claims = decode_claims(&self.access_token).unwrap_or_default();
        let user = match self.user {
            Some(u) => User::from(u),
            None => User {
                id: claims.sub.clone().ok_or(AuthError::Malformed("user"))?,
                email: claims.email.clone(),
                display_name: None,
            },
        };
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now.saturating_add(secs)))
            .or(claims.exp);
        Ok(Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user,
        })
    }
}

impl SupabaseAuth {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>, file: Option<SessionFile>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            client: reqwest::Client::new(),
            current: RwLock::new(None),
            file,
            events,
        }
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, AuthError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(AuthError::Api { status, body })
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type={}", self.base_url, grant_type);
        let res = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = Self::check(res).await?.json().await?;
        token.into_session(chrono::Utc::now().timestamp())
    }

    async fn store(&self, session: Option<Session>) {
        if let Some(file) = &self.file {
            let result = match &session {
                Some(s) => file.save(s),
                None => file.clear(),
            };
            if let Err(e) = result {
                log::warn!("auth: could not persist session: {:#}", e);
            }
        }
        *self.current.write().await = session;
    }

    fn emit(&self, event: AuthEvent) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let current = self.current.read().await.clone();
        let session = match current {
            Some(s) => s,
            None => match self.file.as_ref().and_then(SessionFile::load) {
                Some(s) => {
                    log::debug!("auth: restored session for user {}", s.user.id);
                    *self.current.write().await = Some(s.clone());
                    s
                }
                None => return Ok(None),
            },
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }
        match session.refresh_token.as_deref() {
            Some(refresh) => self.refresh_session(refresh).await.map(Some),
            None => {
                log::info!("auth: stored session expired and cannot be refreshed");
                self.store(None).await;
                Ok(None)
            }
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let session = self
            .token_grant(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        log::info!("auth: signed in as {}", session.user.id);
        self.store(Some(session.clone())).await;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let session = self
            .token_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;
        log::debug!("auth: refreshed session for {}", session.user.id);
        self.store(Some(session.clone())).await;
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, AuthError> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let res = self
            .client
            .get(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let user: UserResponse = Self::check(res).await?.json().await?;
        Ok(user.into())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let current = self.current.read().await.clone();
        let Some(session) = current else {
            self.store(None).await;
            return Err(AuthError::NoSession);
        };
        let url = format!("{}/auth/v1/logout", self.base_url);
        let remote = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await;
        self.store(None).await;
        self.emit(AuthEvent::SignedOut);
        Self::check(remote?).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
