//! One in-flight operation per kind.
//!
//! A double-tap on "sign in" must not produce two network calls or race on
//! the loading flag. Callers take an [`InFlightGuard`] before starting work;
//! a second caller for the same [`Operation`] is turned away until the first
//! guard drops.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::AuthError;
use crate::federated::ProviderKind;

/// Kinds of auth operations, used for in-flight tracking and cooldown keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SignIn,
    SignUp,
    Federated(ProviderKind),
    SignOut,
    ResetPassword,
    ResendVerification,
    RefreshSession,
    RestoreSession,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignIn => f.write_str("Sign in"),
            Self::SignUp => f.write_str("Sign up"),
            Self::Federated(provider) => write!(f, "{provider} sign in"),
            Self::SignOut => f.write_str("Sign out"),
            Self::ResetPassword => f.write_str("Password reset"),
            Self::ResendVerification => f.write_str("Verification resend"),
            Self::RefreshSession => f.write_str("Session refresh"),
            Self::RestoreSession => f.write_str("Session restore"),
        }
    }
}

#[derive(Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<Operation>>>,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `op`, or fail with [`AuthError::InProgress`] if already claimed.
    pub fn try_begin(&self, op: Operation) -> Result<InFlightGuard, AuthError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(op) {
            return Err(AuthError::InProgress(op));
        }
        Ok(InFlightGuard { active: Arc::clone(&self.active), op })
    }

    #[must_use]
    pub fn is_active(&self, op: Operation) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&op)
    }
}

/// Releases its operation on drop, including on error paths and when the
/// owning future is cancelled.
#[must_use = "the operation is released as soon as the guard drops"]
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<Operation>>>,
    op: Operation,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.op);
    }
}

#[cfg(test)]
#[path = "inflight_test.rs"]
mod tests;
