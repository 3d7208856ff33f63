//! Credential session holder: republishes the provider's session to subscribers.

use crate::auth::provider::IdentityProvider;
use crate::auth::session::{AuthEvent, AuthState, Session, User};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub struct SessionHolder {
    provider: Arc<dyn IdentityProvider>,
    state: Arc<watch::Sender<AuthState>>,
    listener: JoinHandle<()>,
}

impl SessionHolder {
    /// Start the holder without waiting: the state reads `loading` until the provider has
    /// answered the initial session query (successfully or not), then follows provider events.
    pub fn spawn(provider: Arc<dyn IdentityProvider>) -> Self {
        let (tx, _) = watch::channel(AuthState::loading());
        let state = Arc::new(tx);
        // Subscribe before the initial query so no event falls in between.
        let events = provider.subscribe();
        let listener = tokio::spawn(run(Arc::clone(&provider), events, Arc::clone(&state)));
        Self {
            provider,
            state,
            listener,
        }
    }

    /// Like [`spawn`](Self::spawn), returning once the initial session query has answered.
    pub async fn start(provider: Arc<dyn IdentityProvider>) -> Self {
        let holder = Self::spawn(provider);
        holder.ready().await;
        holder
    }

    /// Wait until the initial session query has answered.
    pub async fn ready(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|s| !s.loading).await;
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub fn bearer(&self) -> Option<String> {
        self.state.borrow().bearer()
    }

    pub fn user_id_or_default(&self) -> String {
        self.state.borrow().user_id_or_default()
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Sign out through the provider. Failures are logged; the resulting state arrives as an event.
    pub async fn sign_out(&self) {
        if let Err(e) = self.provider.sign_out().await {
            log::error!("error signing out: {}", e);
        }
    }
}

impl Drop for SessionHolder {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn run(
    provider: Arc<dyn IdentityProvider>,
    events: broadcast::Receiver<AuthEvent>,
    state: Arc<watch::Sender<AuthState>>,
) {
    let initial = match provider.get_session().await {
        Ok(session) => session,
        Err(e) => {
            log::error!("error getting session: {}", e);
            None
        }
    };
    state.send_replace(AuthState {
        session: initial,
        loading: false,
    });
    listen(provider, events, state).await;
}

async fn listen(
    provider: Arc<dyn IdentityProvider>,
    mut events: broadcast::Receiver<AuthEvent>,
    state: Arc<watch::Sender<AuthState>>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                log::debug!("auth: state change {}", event_name(&event));
                state.send_replace(AuthState {
                    session: event.session().cloned(),
                    loading: false,
                });
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("auth: missed {} events, resyncing session", missed);
                match provider.get_session().await {
                    Ok(session) => {
                        state.send_replace(AuthState {
                            session,
                            loading: false,
                        });
                    }
                    Err(e) => log::error!("error getting session: {}", e),
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn event_name(event: &AuthEvent) -> &'static str {
    match event {
        AuthEvent::InitialSession(_) => "INITIAL_SESSION",
        AuthEvent::SignedIn(_) => "SIGNED_IN",
        AuthEvent::SignedOut => "SIGNED_OUT",
        AuthEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
        AuthEvent::UserUpdated(_) => "USER_UPDATED",
    }
}
