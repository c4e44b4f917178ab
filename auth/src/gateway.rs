//! Auth gateway: app-level calls onto an [`AuthBackend`].
//!
//! DESIGN
//! ======
//! The gateway is the only code that sees backend records and backend error
//! strings. Everything leaving it is an app type (`User`, `Session`) or an
//! [`AuthError`]. Input is validated before any request is made; a rejected
//! email or password never costs a round trip.
//!
//! ERROR HANDLING
//! ==============
//! Backend futures and native provider flows run under `catch_unwind`, so a
//! panic in either surfaces as [`AuthError::Unexpected`] rather than tearing
//! down the caller. Classification is message- and code-based because the
//! hosted service reports most failures as a 400 with prose.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{AuthBackend, BackendError, RawSession, RawUser, StoredTokens};
use crate::config::{AuthConfig, CredentialPolicy, DEFAULT_EMAIL_COOLDOWN_SECS};
use crate::cooldown::EmailCooldown;
use crate::error::{AuthError, RateLimitScope, UnavailableReason, ValidationError};
use crate::federated::{FederatedError, ProviderKind, ProviderRegistry};
use crate::inflight::{InFlight, Operation};
use crate::session::{Session, User, UserId, now_epoch_secs};

/// Minimum the hosted service enforces when its message omits the number.
const SERVICE_MIN_PASSWORD_LEN: usize = 6;

// =============================================================================
// RESULT TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub user: User,
    pub session: Session,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpResult {
    pub user: Option<User>,
    pub session: Option<Session>,
    /// True when no session was issued because the email is unconfirmed.
    pub needs_email_verification: bool,
}

/// Live listener registered with [`AuthGateway::subscribe`]. Dropping it
/// unsubscribes.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn unsubscribe(self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

#[derive(Clone)]
pub struct AuthGateway {
    backend: Arc<dyn AuthBackend>,
    providers: ProviderRegistry,
    credentials: CredentialPolicy,
    cooldown: EmailCooldown,
    inflight: InFlight,
}

impl AuthGateway {
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>, providers: ProviderRegistry) -> Self {
        Self {
            backend,
            providers,
            credentials: CredentialPolicy::default(),
            cooldown: EmailCooldown::new(Duration::from_secs(DEFAULT_EMAIL_COOLDOWN_SECS)),
            inflight: InFlight::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &AuthConfig, backend: Arc<dyn AuthBackend>, providers: ProviderRegistry) -> Self {
        Self::new(backend, providers)
            .with_credential_policy(config.credentials)
            .with_email_cooldown(config.email_cooldown)
    }

    #[must_use]
    pub fn with_credential_policy(mut self, credentials: CredentialPolicy) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_email_cooldown(mut self, window: Duration) -> Self {
        self.cooldown = EmailCooldown::new(window);
        self
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSuccess, AuthError> {
        let email = normalize_email(email).ok_or(ValidationError::InvalidEmail)?;
        if password.is_empty() {
            return Err(ValidationError::EmptyPassword.into());
        }
        let raw = call_backend(Operation::SignIn, self.backend.sign_in_with_password(&email, password)).await?;
        let success = into_success(raw)?;
        info!(user_id = %success.user.id, "signed in");
        Ok(success)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResult, AuthError> {
        let email = normalize_email(email).ok_or(ValidationError::InvalidEmail)?;
        let min = self.credentials.min_password_len;
        if password.chars().count() < min {
            return Err(ValidationError::PasswordTooShort { min }.into());
        }

        let raw = call_backend(Operation::SignUp, self.backend.sign_up(&email, password)).await?;
        let session = raw.session.map(transform_session).transpose()?;
        let user = match (&session, raw.user) {
            (Some(session), _) => Some(session.user.clone()),
            (None, Some(user)) => Some(transform_user(user)?),
            (None, None) => None,
        };
        let needs_email_verification = session.is_none() && !user.as_ref().is_some_and(|u| u.email_confirmed);
        info!(needs_email_verification, "signed up");
        Ok(SignUpResult { user, session, needs_email_verification })
    }

    /// Run the native flow for `kind`, then exchange its identity token.
    pub async fn sign_in_with_provider(&self, kind: ProviderKind) -> Result<AuthSuccess, AuthError> {
        let platform = self.providers.platform();
        if !kind.available_on(platform) {
            let required = kind.required_platform().unwrap_or(platform);
            return Err(AuthError::Unavailable {
                provider: kind,
                reason: UnavailableReason::UnsupportedPlatform { required },
            });
        }
        let Some(provider) = self.providers.get(kind) else {
            return Err(AuthError::Unavailable { provider: kind, reason: UnavailableReason::NotConfigured });
        };

        let op = Operation::Federated(kind);
        let _guard = self.inflight.try_begin(op)?;

        let available = AssertUnwindSafe(provider.is_available())
            .catch_unwind()
            .await
            .map_err(|panic| panicked(op, &*panic))?;
        if !available {
            return Err(AuthError::Unavailable { provider: kind, reason: UnavailableReason::DeviceUnsupported });
        }

        let token = AssertUnwindSafe(provider.obtain_id_token())
            .catch_unwind()
            .await
            .map_err(|panic| panicked(op, &*panic))?
            .map_err(|e| classify_federated(kind, e))?;

        let raw = call_backend(op, self.backend.sign_in_with_id_token(kind, token.expose())).await?;
        let success = into_success(raw)?;
        info!(provider = kind.as_str(), user_id = %success.user.id, "signed in with provider");
        Ok(success)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        call_backend(Operation::SignOut, self.backend.sign_out()).await?;
        info!("signed out");
        Ok(())
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        self.send_email(Operation::ResetPassword, email).await
    }

    pub async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        self.send_email(Operation::ResendVerification, email).await
    }

    async fn send_email(&self, op: Operation, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email).ok_or(ValidationError::InvalidEmail)?;
        self.cooldown.check(op, &email)?;
        match op {
            Operation::ResetPassword => call_backend(op, self.backend.reset_password_for_email(&email)).await?,
            _ => call_backend(op, self.backend.resend_signup_confirmation(&email)).await?,
        }
        self.cooldown.record(op, &email);
        debug!(operation = %op, "auth email requested");
        Ok(())
    }

    pub async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let raw = call_backend(Operation::RestoreSession, self.backend.get_session()).await?;
        raw.map(transform_session).transpose()
    }

    /// The backend's current view of the signed-in user.
    pub async fn current_user(&self) -> Result<Option<User>, AuthError> {
        let raw = call_backend(Operation::RestoreSession, self.backend.get_user()).await?;
        raw.map(transform_user).transpose()
    }

    /// Rotate the session. `Ok(None)` when the backend holds none.
    pub async fn refresh_session(&self) -> Result<Option<Session>, AuthError> {
        let raw = call_backend(Operation::RefreshSession, self.backend.refresh_session()).await?;
        raw.map(transform_session).transpose()
    }

    /// Hand a session persisted by an earlier process back to the backend.
    pub async fn restore_session(&self, session: &Session) -> Result<Session, AuthError> {
        let raw = call_backend(Operation::RestoreSession, self.backend.restore_session(to_stored_tokens(session))).await?;
        transform_session(raw)
    }

    /// Listen for out-of-band session changes.
    ///
    /// A listener that falls behind the event stream resyncs from
    /// `get_session` instead of replaying what it missed.
    pub fn subscribe<F, Fut>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(Option<Session>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.backend.subscribe();
        let backend = Arc::clone(&self.backend);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => match change.session.map(transform_session).transpose() {
                        Ok(session) => {
                            debug!(event = ?change.event, "session changed out of band");
                            callback(session).await;
                        }
                        Err(e) => warn!(error = %e, "ignoring malformed session event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session events lagged; resyncing");
                        match backend.get_session().await {
                            Ok(raw) => match raw.map(transform_session).transpose() {
                                Ok(session) => callback(session).await,
                                Err(e) => warn!(error = %e, "resync returned malformed session"),
                            },
                            Err(e) => warn!(error = %e, "session resync failed"),
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Subscription { handle }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Trim and lowercase `email`, rejecting anything without exactly one `@`
/// between non-empty parts.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(email)
}

async fn call_backend<T, F>(op: Operation, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            let classified = classify(&err);
            if matches!(classified, AuthError::Unexpected(_) | AuthError::Network(_)) {
                warn!(operation = %op, error = %err, "auth backend call failed");
            } else {
                debug!(operation = %op, error = %err, "auth backend rejected request");
            }
            Err(classified)
        }
        Err(panic) => Err(panicked(op, &*panic)),
    }
}

fn panicked(op: Operation, panic: &(dyn Any + Send)) -> AuthError {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    warn!(operation = %op, detail = %detail, "auth call panicked");
    AuthError::Unexpected(format!("{op} panicked: {detail}"))
}

/// Map a backend failure onto the app's error vocabulary.
#[must_use]
pub fn classify(err: &BackendError) -> AuthError {
    let (status, code, message) = match err {
        BackendError::Transport(detail) => return AuthError::Network(detail.clone()),
        BackendError::Parse(detail) => return AuthError::Unexpected(detail.clone()),
        BackendError::Api { status, code, message } => (*status, code.as_deref().unwrap_or(""), message.to_lowercase()),
    };

    if status == Some(429) || code.contains("rate_limit") || message.contains("rate limit") {
        let scope = if code.contains("email") || message.contains("email") {
            RateLimitScope::Emails
        } else {
            RateLimitScope::Requests
        };
        return AuthError::RateLimited { scope, retry_after_secs: None };
    }
    if code == "invalid_credentials" || message.contains("invalid login credentials") {
        return AuthError::InvalidCredentials;
    }
    if code == "email_not_confirmed" || message.contains("email not confirmed") {
        return AuthError::UnconfirmedIdentity;
    }
    if matches!(code, "user_already_exists" | "email_exists") || message.contains("already registered") {
        return AuthError::DuplicateRegistration;
    }
    if code == "weak_password" || message.contains("password should be at least") {
        let min = message
            .split_whitespace()
            .find_map(|word| word.parse::<usize>().ok())
            .unwrap_or(SERVICE_MIN_PASSWORD_LEN);
        return ValidationError::PasswordTooShort { min }.into();
    }
    if message.contains("unable to validate email address") {
        return ValidationError::InvalidEmail.into();
    }
    if matches!(
        code,
        "refresh_token_not_found" | "refresh_token_already_used" | "session_not_found" | "session_expired"
    ) || message.contains("invalid refresh token")
        || status == Some(401)
    {
        return AuthError::SessionExpired;
    }
    if matches!(status, Some(502..=504)) {
        return AuthError::Network(message);
    }
    AuthError::Unexpected(message)
}

fn classify_federated(kind: ProviderKind, err: FederatedError) -> AuthError {
    match err {
        FederatedError::Cancelled => AuthError::Cancelled(kind),
        FederatedError::InProgress => AuthError::InProgress(Operation::Federated(kind)),
        FederatedError::Unavailable => {
            AuthError::Unavailable { provider: kind, reason: UnavailableReason::DeviceUnsupported }
        }
        FederatedError::MissingToken => AuthError::Unexpected(format!("{kind} flow returned no identity token")),
        FederatedError::Failed(detail) => AuthError::Unexpected(detail),
    }
}

fn into_success(raw: RawSession) -> Result<AuthSuccess, AuthError> {
    let session = transform_session(raw)?;
    Ok(AuthSuccess { user: session.user.clone(), session })
}

fn parse_timestamp(field: &str, value: &str) -> Result<OffsetDateTime, AuthError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| AuthError::Unexpected(format!("invalid {field} timestamp: {e}")))
}

fn transform_user(raw: RawUser) -> Result<User, AuthError> {
    let last_sign_in_at = raw
        .last_sign_in_at
        .as_deref()
        .map(|at| parse_timestamp("last_sign_in_at", at))
        .transpose()?;
    Ok(User {
        id: UserId::new(raw.id),
        email: raw.email.unwrap_or_default(),
        email_confirmed: raw.email_confirmed_at.is_some_and(|at| !at.is_empty()),
        last_sign_in_at,
        created_at: parse_timestamp("created_at", &raw.created_at)?,
    })
}

fn transform_session(raw: RawSession) -> Result<Session, AuthError> {
    let raw = raw.with_absolute_expiry(now_epoch_secs());
    Ok(Session {
        access_token: raw.access_token,
        refresh_token: raw.refresh_token,
        expires_at: raw.expires_at.unwrap_or(0),
        user: transform_user(raw.user)?,
    })
}

fn to_stored_tokens(session: &Session) -> StoredTokens {
    StoredTokens {
        access_token: session.access_token.clone(),
        refresh_token: session.refresh_token.clone(),
        expires_at: (session.expires_at > 0).then_some(session.expires_at),
    }
}

#[cfg(test)]
#[path = "gateway_test.rs"]
mod tests;
