//! Credential session: identity provider seam, Supabase implementation, persisted session file,
//! and the holder that republishes the current session to subscribers.

mod holder;
mod provider;
mod session;
mod store;
mod supabase;

pub use holder::SessionHolder;
pub use provider::{AuthError, IdentityProvider};
pub use session::{decode_claims, AuthEvent, AuthState, Session, TokenClaims, User, DEFAULT_USER_ID};
pub use store::SessionFile;
pub use supabase::SupabaseAuth;
