//! Auth phase machine and selectors over [`AuthState`].
//!
//! An unconfirmed session is a valid backend credential, but the app does
//! not treat it as signed in. That rule lives in one predicate,
//! [`satisfies_confirmation_policy`], so it can change without touching
//! the guards.

use crate::session::User;
use crate::store::AuthState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// Rehydration or the first backend fetch has not finished yet.
    Initializing,
    Unauthenticated,
    /// Holds a session whose user has not confirmed their email.
    AuthenticatedUnconfirmed,
    Authenticated,
}

impl AuthPhase {
    #[must_use]
    pub fn of(state: &AuthState) -> Self {
        if !state.is_initialized {
            return Self::Initializing;
        }
        match (&state.user, &state.session) {
            (Some(user), Some(_)) if satisfies_confirmation_policy(user) => Self::Authenticated,
            (Some(_), Some(_)) => Self::AuthenticatedUnconfirmed,
            _ => Self::Unauthenticated,
        }
    }

    /// Only a fully confirmed session counts for navigation.
    #[must_use]
    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

/// Whether `user` may use the app with its session.
#[must_use]
pub fn satisfies_confirmation_policy(user: &User) -> bool {
    user.email_confirmed
}

#[must_use]
pub fn select_is_authenticated(state: &AuthState) -> bool {
    state.session.is_some() && state.user.as_ref().is_some_and(satisfies_confirmation_policy)
}

#[must_use]
pub fn select_is_email_verified(state: &AuthState) -> bool {
    state.user.as_ref().is_some_and(|user| user.email_confirmed)
}

#[must_use]
pub fn select_needs_email_verification(state: &AuthState) -> bool {
    state.user.as_ref().is_some_and(|user| !user.email_confirmed)
}

#[cfg(test)]
#[path = "phase_test.rs"]
mod tests;
