//! Shared fixtures for unit tests.

use std::collections::HashSet;
use std::sync::Arc;

use time::macros::datetime;
use tokio::sync::{Notify, broadcast};

use crate::backend::memory::{BackendOp, MemoryBackend};
use crate::backend::{AuthBackend, BackendError, RawSession, RawSignUp, RawUser, SessionChange, StoredTokens};
use crate::federated::{FederatedError, FederatedProvider, IdToken, Platform, ProviderKind, ProviderRegistry};
use crate::gateway::AuthGateway;
use crate::session::{Session, User, UserId, now_epoch_secs};

pub const EMAIL: &str = "alice@example.com";
pub const PASSWORD: &str = "correct-horse-battery";

pub fn sample_user(confirmed: bool) -> User {
    User {
        id: UserId::new("0b6c7a52-3f7e-4a55-9b61-2f1f0b7d9a10"),
        email: EMAIL.to_owned(),
        email_confirmed: confirmed,
        last_sign_in_at: Some(datetime!(2024-05-02 10:00 UTC)),
        created_at: datetime!(2024-05-01 09:00 UTC),
    }
}

pub fn sample_session(confirmed: bool) -> Session {
    Session {
        access_token: "access-token-1".to_owned(),
        refresh_token: "refresh-token-1".to_owned(),
        expires_at: now_epoch_secs() + 3600,
        user: sample_user(confirmed),
    }
}

pub fn raw_session(email: &str, confirmed: bool) -> RawSession {
    RawSession {
        access_token: format!("access-{email}"),
        refresh_token: format!("refresh-{email}"),
        expires_in: Some(3600),
        expires_at: Some(now_epoch_secs() + 3600),
        user: RawUser {
            id: format!("id-{email}"),
            email: Some(email.to_owned()),
            email_confirmed_at: confirmed.then(|| "2024-05-01T10:00:00Z".to_owned()),
            last_sign_in_at: Some("2024-05-02T10:00:00Z".to_owned()),
            created_at: "2024-05-01T09:00:00Z".to_owned(),
        },
    }
}

/// Gateway over `backend` on iOS, with every registered provider.
pub fn gateway_with(backend: Arc<dyn AuthBackend>, providers: Vec<Arc<dyn FederatedProvider>>) -> AuthGateway {
    let registry = providers
        .into_iter()
        .fold(ProviderRegistry::new(Platform::Ios), ProviderRegistry::with);
    AuthGateway::new(backend, registry)
}

// =============================================================================
// BACKENDS
// =============================================================================

/// Delegates to a [`MemoryBackend`] but panics on the listed operations.
pub struct PanickingBackend {
    pub inner: Arc<MemoryBackend>,
    panic_on: HashSet<BackendOp>,
}

impl PanickingBackend {
    pub fn new(inner: Arc<MemoryBackend>, panic_on: &[BackendOp]) -> Self {
        Self { inner, panic_on: panic_on.iter().copied().collect() }
    }

    fn check(&self, op: BackendOp) {
        assert!(!self.panic_on.contains(&op), "backend exploded during {op:?}");
    }
}

#[async_trait::async_trait]
impl AuthBackend for PanickingBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<RawSession, BackendError> {
        self.check(BackendOp::SignIn);
        self.inner.sign_in_with_password(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<RawSignUp, BackendError> {
        self.check(BackendOp::SignUp);
        self.inner.sign_up(email, password).await
    }

    async fn sign_in_with_id_token(
        &self,
        provider: ProviderKind,
        id_token: &str,
    ) -> Result<RawSession, BackendError> {
        self.check(BackendOp::IdToken);
        self.inner.sign_in_with_id_token(provider, id_token).await
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.check(BackendOp::SignOut);
        self.inner.sign_out().await
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), BackendError> {
        self.check(BackendOp::ResetPassword);
        self.inner.reset_password_for_email(email).await
    }

    async fn resend_signup_confirmation(&self, email: &str) -> Result<(), BackendError> {
        self.check(BackendOp::Resend);
        self.inner.resend_signup_confirmation(email).await
    }

    async fn get_session(&self) -> Result<Option<RawSession>, BackendError> {
        self.check(BackendOp::GetSession);
        self.inner.get_session().await
    }

    async fn get_user(&self) -> Result<Option<RawUser>, BackendError> {
        self.check(BackendOp::GetUser);
        self.inner.get_user().await
    }

    async fn refresh_session(&self) -> Result<Option<RawSession>, BackendError> {
        self.check(BackendOp::Refresh);
        self.inner.refresh_session().await
    }

    async fn restore_session(&self, tokens: StoredTokens) -> Result<RawSession, BackendError> {
        self.check(BackendOp::Restore);
        self.inner.restore_session(tokens).await
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.inner.subscribe()
    }
}

// =============================================================================
// PROVIDERS
// =============================================================================

/// Native flow that resolves to a fixed outcome.
pub struct ScriptedProvider {
    kind: ProviderKind,
    available: bool,
    outcome: Result<IdToken, FederatedError>,
}

impl ScriptedProvider {
    pub fn token(kind: ProviderKind, token: &str) -> Arc<dyn FederatedProvider> {
        Arc::new(Self { kind, available: true, outcome: Ok(IdToken::new(token)) })
    }

    pub fn failing(kind: ProviderKind, err: FederatedError) -> Arc<dyn FederatedProvider> {
        Arc::new(Self { kind, available: true, outcome: Err(err) })
    }

    pub fn unavailable(kind: ProviderKind) -> Arc<dyn FederatedProvider> {
        Arc::new(Self { kind, available: false, outcome: Err(FederatedError::Unavailable) })
    }
}

#[async_trait::async_trait]
impl FederatedProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn obtain_id_token(&self) -> Result<IdToken, FederatedError> {
        self.outcome.clone()
    }
}

/// Native flow that blocks until released, for overlapping-call tests.
pub struct GatedProvider {
    kind: ProviderKind,
    token: IdToken,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedProvider {
    pub fn new(kind: ProviderKind, token: &str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            token: IdToken::new(token),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        })
    }
}

#[async_trait::async_trait]
impl FederatedProvider for GatedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn obtain_id_token(&self) -> Result<IdToken, FederatedError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.token.clone())
    }
}

/// Native flow that panics mid-flow.
pub struct PanickingProvider(pub ProviderKind);

#[async_trait::async_trait]
impl FederatedProvider for PanickingProvider {
    fn kind(&self) -> ProviderKind {
        self.0
    }

    async fn obtain_id_token(&self) -> Result<IdToken, FederatedError> {
        panic!("native sign-in module crashed");
    }
}
