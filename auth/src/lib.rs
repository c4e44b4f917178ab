//! Client-side authentication session subsystem.
//!
//! ARCHITECTURE
//! ============
//! Leaf first: `session` holds the passive token/identity model, `gateway`
//! adapts app-level calls onto an [`backend::AuthBackend`] and folds every
//! failure into [`AuthError`], `store` owns the single source of truth for
//! who is logged in, and `guards` derive navigation decisions from store
//! state without side effects.
//!
//! UI action -> store action -> gateway -> backend -> normalized result ->
//! store update (+ persistence) -> guards react.

pub mod backend;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod federated;
pub mod gateway;
pub mod guards;
pub mod inflight;
pub mod phase;
pub mod session;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::AuthConfig;
pub use error::{AuthError, AuthErrorKind, ErrorCode};
pub use federated::{Platform, ProviderKind};
pub use gateway::{AuthGateway, AuthSuccess, SignUpResult};
pub use phase::AuthPhase;
pub use session::{Session, User, UserId};
pub use store::{AuthState, SessionStore, SignUpOutcome};
