//! Backend-as-a-service boundary.
//!
//! ARCHITECTURE
//! ============
//! [`AuthBackend`] is the only seam to the hosted auth service. It speaks
//! the service's own record shapes (`RawUser`, `RawSession`) and error
//! strings; the gateway owns the translation into app types. Backends keep
//! their current session in a [`SessionCell`], which also fans out
//! [`SessionChange`] events to subscribers.

pub mod gotrue;
pub mod memory;

use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorCode;
use crate::federated::ProviderKind;

const EVENT_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// WIRE RECORDS
// =============================================================================

/// User record as the auth service returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
    #[serde(default)]
    pub last_sign_in_at: Option<String>,
    pub created_at: String,
}

/// Session record as the auth service returns it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: RawUser,
}

impl RawSession {
    /// Fill `expires_at` from `expires_in` when the service only sent a lifetime.
    #[must_use]
    pub fn with_absolute_expiry(mut self, now: i64) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = self.expires_in.map(|secs| now.saturating_add(secs));
        }
        self
    }

    #[must_use]
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|at| now.saturating_add(margin_secs) >= at)
    }
}

impl fmt::Debug for RawSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Tokens of a session persisted by an earlier process. The backend looks
/// the user up again; nothing about the identity is carried over.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
}

impl StoredTokens {
    #[must_use]
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|at| now.saturating_add(margin_secs) >= at)
    }

    /// Reattach a freshly fetched user.
    #[must_use]
    pub fn into_session(self, user: RawUser) -> RawSession {
        RawSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: None,
            expires_at: self.expires_at,
            user,
        }
    }
}

impl From<&RawSession> for StoredTokens {
    fn from(session: &RawSession) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
        }
    }
}

impl fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a sign-up: a session is only issued when no confirmation is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignUp {
    pub user: Option<RawUser>,
    pub session: Option<RawSession>,
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Out-of-band change to the backend's current session.
#[derive(Debug, Clone)]
pub struct SessionChange {
    pub event: SessionEvent,
    pub session: Option<RawSession>,
}

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Failure reported by an auth backend, before classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The service answered with an error body.
    #[error("auth api error (status {status:?}, code {code:?}): {message}")]
    Api { status: Option<u16>, code: Option<String>, message: String },

    /// The request never produced a response.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response body did not have the expected shape.
    #[error("response parse failed: {0}")]
    Parse(String),
}

impl BackendError {
    #[must_use]
    pub fn api(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Api { status: Some(status), code: code.map(str::to_owned), message: message.into() }
    }
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Api { .. } => "E_BACKEND_API",
            Self::Transport(_) => "E_BACKEND_TRANSPORT",
            Self::Parse(_) => "E_BACKEND_PARSE",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => matches!(status, Some(429 | 502..=504)),
            Self::Parse(_) => false,
        }
    }
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Remote credential operations consumed by the gateway.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<RawSession, BackendError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<RawSignUp, BackendError>;

    async fn sign_in_with_id_token(&self, provider: ProviderKind, id_token: &str)
    -> Result<RawSession, BackendError>;

    /// Revoke the current session. Succeeds when there is none.
    async fn sign_out(&self) -> Result<(), BackendError>;

    async fn reset_password_for_email(&self, email: &str) -> Result<(), BackendError>;

    async fn resend_signup_confirmation(&self, email: &str) -> Result<(), BackendError>;

    /// Current session, refreshed first when it has already expired.
    async fn get_session(&self) -> Result<Option<RawSession>, BackendError>;

    async fn get_user(&self) -> Result<Option<RawUser>, BackendError>;

    /// Rotate the current session. `Ok(None)` when there is nothing to rotate.
    async fn refresh_session(&self) -> Result<Option<RawSession>, BackendError>;

    /// Adopt a session persisted by a previous process.
    async fn restore_session(&self, tokens: StoredTokens) -> Result<RawSession, BackendError>;

    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
}

// =============================================================================
// SESSION CELL
// =============================================================================

/// A backend's current session plus the change fan-out.
pub struct SessionCell {
    current: RwLock<Option<RawSession>>,
    events: broadcast::Sender<SessionChange>,
}

impl SessionCell {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { current: RwLock::new(None), events }
    }

    #[must_use]
    pub fn current(&self) -> Option<RawSession> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the session and notify subscribers.
    pub fn replace(&self, event: SessionEvent, session: Option<RawSession>) {
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            current.clone_from(&session);
        }
        // No receivers is fine; nobody is listening yet.
        let _ = self.events.send(SessionChange { event, session });
    }

    /// Drop the session, notifying only if there was one.
    pub fn clear(&self) {
        let had_session = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if had_session {
            let _ = self.events.send(SessionChange { event: SessionEvent::SignedOut, session: None });
        }
    }

    /// Forget the session without notifying anyone.
    pub fn reset(&self) {
        self.current.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
