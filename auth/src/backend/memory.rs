//! In-process auth backend.
//!
//! DESIGN
//! ======
//! Mirrors the hosted service's observable behavior closely enough to drive
//! the store end to end without a network: salted password digests,
//! confirmation gating, refresh-token rotation, revocation and a per-email
//! send interval. Error messages use the service's own wording so the
//! gateway's classification is exercised for real.
//!
//! Failures can be queued per operation with [`MemoryBackend::fail_next`],
//! and every call is counted so callers can assert that validation or
//! cooldowns short-circuited before the "network".

use std::collections::{HashMap, VecDeque};
use std::fmt::Write;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    AuthBackend, BackendError, RawSession, RawSignUp, RawUser, SessionCell, SessionChange, SessionEvent, StoredTokens,
};
use crate::federated::ProviderKind;
use crate::session::now_epoch_secs;

const DEFAULT_SESSION_TTL_SECS: i64 = 3600;
const DEFAULT_EMAIL_INTERVAL_SECS: u64 = 60;
const SERVICE_MIN_PASSWORD_LEN: usize = 6;

/// Backend operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    SignIn,
    SignUp,
    IdToken,
    SignOut,
    ResetPassword,
    Resend,
    GetSession,
    GetUser,
    Refresh,
    Restore,
}

struct Account {
    user: RawUser,
    salt: String,
    digest: String,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    /// Live access tokens -> account email.
    access_tokens: HashMap<String, String>,
    /// Live refresh tokens -> account email.
    refresh_tokens: HashMap<String, String>,
    identities: HashMap<(ProviderKind, String), String>,
    last_email: HashMap<String, Instant>,
    failures: HashMap<BackendOp, VecDeque<BackendError>>,
    calls: HashMap<BackendOp, usize>,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    cell: SessionCell,
    require_confirmation: bool,
    session_ttl_secs: i64,
    email_interval: Duration,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cell: SessionCell::new(),
            require_confirmation: true,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            email_interval: Duration::from_secs(DEFAULT_EMAIL_INTERVAL_SECS),
        }
    }

    /// Whether new sign-ups must confirm their email before a session is issued.
    #[must_use]
    pub fn with_confirmation_required(mut self, required: bool) -> Self {
        self.require_confirmation = required;
        self
    }

    #[must_use]
    pub fn with_session_ttl_secs(mut self, ttl: i64) -> Self {
        self.session_ttl_secs = ttl;
        self
    }

    #[must_use]
    pub fn with_email_interval(mut self, interval: Duration) -> Self {
        self.email_interval = interval;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an account directly, bypassing sign-up rules.
    pub fn seed_account(&self, email: &str, password: &str, confirmed: bool) -> RawUser {
        let mut inner = self.lock();
        let user = new_user(email, confirmed);
        let salt = generate_token(16);
        let digest = hash_password(&salt, password);
        inner
            .accounts
            .insert(email.to_owned(), Account { user: user.clone(), salt, digest });
        user
    }

    /// Mark an email confirmed, as if the user followed the link.
    pub fn confirm_email(&self, email: &str) {
        if let Some(account) = self.lock().accounts.get_mut(email) {
            account.user.email_confirmed_at = Some(now_rfc3339());
        }
    }

    /// Accept `token` from `provider` as proof of `email`.
    pub fn register_identity(&self, provider: ProviderKind, token: &str, email: &str) {
        self.lock()
            .identities
            .insert((provider, token.to_owned()), email.to_owned());
    }

    /// Invalidate every token issued to `email`, as a server-side revoke would.
    pub fn revoke_sessions(&self, email: &str) {
        let mut inner = self.lock();
        inner.access_tokens.retain(|_, owner| owner != email);
        inner.refresh_tokens.retain(|_, owner| owner != email);
    }

    /// Force the current session's expiry into the past.
    pub fn expire_current(&self) {
        if let Some(mut raw) = self.cell.current() {
            raw.expires_at = Some(now_epoch_secs() - 1);
            self.cell.replace(SessionEvent::UserUpdated, Some(raw));
        }
    }

    /// Forget the local session while keeping issued tokens valid, as a
    /// fresh process on the same device would.
    pub fn simulate_restart(&self) {
        self.cell.reset();
    }

    /// Queue a failure for the next call of `op`.
    pub fn fail_next(&self, op: BackendOp, err: BackendError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    #[must_use]
    pub fn calls(&self, op: BackendOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.cell.subscriber_count()
    }

    #[must_use]
    pub fn current_session(&self) -> Option<RawSession> {
        self.cell.current()
    }

    fn enter(&self, op: BackendOp) -> Result<(), BackendError> {
        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        match inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn issue_session(&self, inner: &mut Inner, email: &str) -> Option<RawSession> {
        let account = inner.accounts.get_mut(email)?;
        account.user.last_sign_in_at = Some(now_rfc3339());
        let user = account.user.clone();

        let access_token = generate_token(32);
        let refresh_token = generate_token(16);
        inner.access_tokens.insert(access_token.clone(), email.to_owned());
        inner.refresh_tokens.insert(refresh_token.clone(), email.to_owned());

        Some(RawSession {
            access_token,
            refresh_token,
            expires_in: Some(self.session_ttl_secs),
            expires_at: Some(now_epoch_secs() + self.session_ttl_secs),
            user,
        })
    }

    fn check_email_interval(&self, inner: &mut Inner, email: &str) -> Result<(), BackendError> {
        let now = Instant::now();
        if let Some(sent) = inner.last_email.get(email) {
            if now.saturating_duration_since(*sent) < self.email_interval {
                return Err(BackendError::api(429, Some("over_email_send_rate_limit"), "Email rate limit exceeded"));
            }
        }
        inner.last_email.insert(email.to_owned(), now);
        Ok(())
    }

    fn rotate(&self, access_token: &str, refresh_token: &str) -> Result<RawSession, BackendError> {
        let rotated = {
            let mut inner = self.lock();
            let Some(email) = inner.refresh_tokens.remove(refresh_token) else {
                drop(inner);
                self.cell.clear();
                return Err(BackendError::api(
                    400,
                    Some("refresh_token_not_found"),
                    "Invalid Refresh Token: Refresh Token Not Found",
                ));
            };
            inner.access_tokens.remove(access_token);
            self.issue_session(&mut inner, &email)
        };
        let Some(rotated) = rotated else {
            self.cell.clear();
            return Err(BackendError::api(404, Some("user_not_found"), "User not found"));
        };
        self.cell.replace(SessionEvent::TokenRefreshed, Some(rotated.clone()));
        Ok(rotated)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<RawSession, BackendError> {
        self.enter(BackendOp::SignIn)?;
        let session = {
            let mut inner = self.lock();
            let Some(account) = inner.accounts.get(email) else {
                return Err(invalid_credentials());
            };
            if hash_password(&account.salt, password) != account.digest {
                return Err(invalid_credentials());
            }
            if account.user.email_confirmed_at.is_none() {
                return Err(BackendError::api(400, Some("email_not_confirmed"), "Email not confirmed"));
            }
            self.issue_session(&mut inner, email)
                .ok_or_else(invalid_credentials)?
        };
        self.cell.replace(SessionEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<RawSignUp, BackendError> {
        self.enter(BackendOp::SignUp)?;
        if password.is_empty() {
            return Err(BackendError::api(422, Some("validation_failed"), "Signup requires a valid password"));
        }
        if !looks_like_email(email) {
            return Err(BackendError::api(
                400,
                Some("validation_failed"),
                "Unable to validate email address: invalid format",
            ));
        }
        if password.chars().count() < SERVICE_MIN_PASSWORD_LEN {
            return Err(BackendError::api(
                422,
                Some("weak_password"),
                format!("Password should be at least {SERVICE_MIN_PASSWORD_LEN} characters"),
            ));
        }

        let (user, session) = {
            let mut inner = self.lock();
            if inner.accounts.contains_key(email) {
                return Err(BackendError::api(422, Some("user_already_exists"), "User already registered"));
            }
            let confirmed = !self.require_confirmation;
            let user = new_user(email, confirmed);
            let salt = generate_token(16);
            let digest = hash_password(&salt, password);
            inner
                .accounts
                .insert(email.to_owned(), Account { user: user.clone(), salt, digest });
            let session = if confirmed { self.issue_session(&mut inner, email) } else { None };
            (session.as_ref().map_or(user, |s| s.user.clone()), session)
        };

        if let Some(session) = &session {
            self.cell.replace(SessionEvent::SignedIn, Some(session.clone()));
        }
        Ok(RawSignUp { user: Some(user), session })
    }

    async fn sign_in_with_id_token(
        &self,
        provider: ProviderKind,
        id_token: &str,
    ) -> Result<RawSession, BackendError> {
        self.enter(BackendOp::IdToken)?;
        let session = {
            let mut inner = self.lock();
            let Some(email) = inner.identities.get(&(provider, id_token.to_owned())).cloned() else {
                return Err(BackendError::api(400, Some("bad_jwt"), "Bad ID token"));
            };
            if !inner.accounts.contains_key(&email) {
                let user = new_user(&email, true);
                let salt = generate_token(16);
                let digest = hash_password(&salt, &generate_token(16));
                inner.accounts.insert(email.clone(), Account { user, salt, digest });
            }
            self.issue_session(&mut inner, &email)
                .ok_or_else(|| BackendError::api(400, Some("bad_jwt"), "Bad ID token"))?
        };
        self.cell.replace(SessionEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.enter(BackendOp::SignOut)?;
        if let Some(current) = self.cell.current() {
            let mut inner = self.lock();
            inner.access_tokens.remove(&current.access_token);
            inner.refresh_tokens.remove(&current.refresh_token);
        }
        self.cell.clear();
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), BackendError> {
        self.enter(BackendOp::ResetPassword)?;
        let mut inner = self.lock();
        self.check_email_interval(&mut inner, email)
    }

    async fn resend_signup_confirmation(&self, email: &str) -> Result<(), BackendError> {
        self.enter(BackendOp::Resend)?;
        let mut inner = self.lock();
        self.check_email_interval(&mut inner, email)
    }

    async fn get_session(&self) -> Result<Option<RawSession>, BackendError> {
        self.enter(BackendOp::GetSession)?;
        match self.cell.current() {
            Some(current) if current.expires_within(now_epoch_secs(), 0) => {
                self.rotate(&current.access_token, &current.refresh_token).map(Some)
            }
            other => Ok(other),
        }
    }

    async fn get_user(&self) -> Result<Option<RawUser>, BackendError> {
        self.enter(BackendOp::GetUser)?;
        let Some(current) = self.cell.current() else {
            return Ok(None);
        };
        let inner = self.lock();
        let Some(email) = inner.access_tokens.get(&current.access_token) else {
            return Err(BackendError::api(401, Some("session_not_found"), "Session not found"));
        };
        Ok(inner.accounts.get(email).map(|account| account.user.clone()))
    }

    async fn refresh_session(&self) -> Result<Option<RawSession>, BackendError> {
        self.enter(BackendOp::Refresh)?;
        match self.cell.current() {
            Some(current) => self.rotate(&current.access_token, &current.refresh_token).map(Some),
            None => Ok(None),
        }
    }

    async fn restore_session(&self, tokens: StoredTokens) -> Result<RawSession, BackendError> {
        self.enter(BackendOp::Restore)?;
        if tokens.expires_within(now_epoch_secs(), 0) {
            return self.rotate(&tokens.access_token, &tokens.refresh_token);
        }
        let restored = {
            let inner = self.lock();
            let Some(email) = inner.access_tokens.get(&tokens.access_token) else {
                return Err(BackendError::api(401, Some("session_not_found"), "Session not found"));
            };
            let user = inner
                .accounts
                .get(email)
                .map(|account| account.user.clone())
                .ok_or_else(|| BackendError::api(404, Some("user_not_found"), "User not found"))?;
            tokens.into_session(user)
        };
        self.cell.replace(SessionEvent::SignedIn, Some(restored.clone()));
        Ok(restored)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.cell.subscribe()
    }
}

fn invalid_credentials() -> BackendError {
    BackendError::api(400, Some("invalid_credentials"), "Invalid login credentials")
}

fn looks_like_email(email: &str) -> bool {
    let mut parts = email.split('@');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    )
}

fn new_user(email: &str, confirmed: bool) -> RawUser {
    let now = now_rfc3339();
    RawUser {
        id: Uuid::new_v4().to_string(),
        email: Some(email.to_owned()),
        email_confirmed_at: confirmed.then(|| now.clone()),
        last_sign_in_at: None,
        created_at: now,
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Random hex token of `len` bytes.
fn generate_token(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    bytes_to_hex(&bytes)
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
