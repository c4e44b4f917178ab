//! Session store: the single source of truth for who is logged in.
//!
//! ARCHITECTURE
//! ============
//! State lives in a `watch` channel so screens can observe it. Every write
//! of `{user, session}`, whether from a user action or an out-of-band
//! backend event, goes through `apply_session`, which holds the writer lock
//! while it replaces the snapshot and persists it. Disk order therefore
//! matches state order, and the last write wins.
//!
//! Actions follow one shape: claim the operation, raise loading, call the
//! gateway, apply the result. Both the claim and the loading flag are
//! released by drop guards, so an error, a panic or a cancelled future can
//! never leave the UI stuck on a spinner.
//!
//! TRADE-OFFS
//! ==========
//! A launch without connectivity keeps the rehydrated session so the user
//! is not signed out by a flaky network. The backend has not seen that
//! session yet, so refresh and user lookups hand it over first when the
//! backend reports none. A refresh that fails for any reason signs out.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{OnceCell, watch};
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::federated::ProviderKind;
use crate::gateway::{AuthGateway, Subscription};
use crate::guards::GuardView;
use crate::inflight::{InFlight, Operation};
use crate::phase::AuthPhase;
use crate::session::{Session, User};
use crate::storage::{PersistedAuth, SnapshotPersister};

/// Observable auth state. Only `user` and `session` are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub is_loading: bool,
    pub is_initialized: bool,
}

impl AuthState {
    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        AuthPhase::of(self)
    }

    fn rehydrated(snapshot: PersistedAuth) -> Self {
        Self { user: snapshot.user, session: snapshot.session, is_loading: false, is_initialized: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignUpOutcome {
    pub needs_verification: bool,
}

struct StoreInner {
    gateway: AuthGateway,
    persister: SnapshotPersister,
    state: watch::Sender<AuthState>,
    writer: tokio::sync::Mutex<()>,
    inflight: InFlight,
    loading: Mutex<usize>,
    init: OnceCell<()>,
    subscription: Mutex<Option<Subscription>>,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

/// Holds `is_loading` up while at least one action is running.
struct LoadingGuard {
    inner: Arc<StoreInner>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let mut active = self.inner.loading.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.inner.state.send_modify(|state| state.is_loading = false);
        }
    }
}

impl SessionStore {
    /// Build a store and rehydrate the persisted snapshot.
    ///
    /// The store is not initialized until [`SessionStore::initialize`] has
    /// run; guards keep showing a loading state until then.
    pub async fn open(gateway: AuthGateway, persister: SnapshotPersister) -> Self {
        let snapshot = persister.load().await;
        let (state, _) = watch::channel(AuthState::rehydrated(snapshot));
        Self {
            inner: Arc::new(StoreInner {
                gateway,
                persister,
                state,
                writer: tokio::sync::Mutex::new(()),
                inflight: InFlight::new(),
                loading: Mutex::new(0),
                init: OnceCell::new(),
                subscription: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        AuthPhase::of(&self.inner.state.borrow())
    }

    #[must_use]
    pub fn guard_view(&self) -> GuardView {
        GuardView::from(&*self.inner.state.borrow())
    }

    #[must_use]
    pub fn gateway(&self) -> &AuthGateway {
        &self.inner.gateway
    }

    /// Resolve once initialization has finished, with the state at that point.
    pub async fn wait_initialized(&self) -> AuthState {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|state| state.is_initialized).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Fetch the backend session, register the out-of-band listener and
    /// mark the store initialized. Later and concurrent calls wait for the
    /// first one and do nothing else.
    pub async fn initialize(&self) {
        self.inner.init.get_or_init(|| self.run_initialize()).await;
    }

    async fn run_initialize(&self) {
        let _loading = self.begin_loading();

        match self.inner.gateway.current_session().await {
            Ok(Some(session)) => self.apply_session(Some(session)).await,
            Ok(None) => self.restore_rehydrated().await,
            Err(e) => {
                warn!(error = %e, "initial session fetch failed");
                self.restore_rehydrated().await;
            }
        }

        self.register_subscription();
        self.inner.state.send_modify(|state| state.is_initialized = true);
        info!(phase = ?self.phase(), "auth initialized");
    }

    async fn restore_rehydrated(&self) {
        let (rehydrated, has_user) = {
            let state = self.inner.state.borrow();
            (state.session.clone(), state.user.is_some())
        };
        let Some(rehydrated) = rehydrated else {
            if has_user {
                self.apply_session(None).await;
            }
            return;
        };

        match self.inner.gateway.restore_session(&rehydrated).await {
            Ok(session) => {
                debug!("rehydrated session restored");
                self.apply_session(Some(session)).await;
            }
            Err(AuthError::Network(detail)) => {
                info!(detail = %detail, "offline at launch; keeping rehydrated session");
            }
            Err(e) => {
                warn!(error = %e, "rehydrated session rejected; signing out");
                self.apply_session(None).await;
            }
        }
    }

    fn register_subscription(&self) {
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let subscription = self.inner.gateway.subscribe(move |session| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    SessionStore { inner }.apply_session(session).await;
                }
            }
        });
        *self.inner.subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _op = self.inner.inflight.try_begin(Operation::SignIn)?;
        let _loading = self.begin_loading();
        let success = self.inner.gateway.sign_in(email, password).await?;
        self.apply_session(Some(success.session)).await;
        Ok(())
    }

    /// Register a new account. A session is only adopted when no email
    /// confirmation is pending.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        let _op = self.inner.inflight.try_begin(Operation::SignUp)?;
        let _loading = self.begin_loading();
        let result = self.inner.gateway.sign_up(email, password).await?;
        if let (false, Some(session)) = (result.needs_email_verification, result.session) {
            self.apply_session(Some(session)).await;
        }
        Ok(SignUpOutcome { needs_verification: result.needs_email_verification })
    }

    pub async fn sign_in_with_provider(&self, provider: ProviderKind) -> Result<(), AuthError> {
        let _op = self.inner.inflight.try_begin(Operation::Federated(provider))?;
        let _loading = self.begin_loading();
        let success = self.inner.gateway.sign_in_with_provider(provider).await?;
        self.apply_session(Some(success.session)).await;
        Ok(())
    }

    /// Clear local state whatever the backend says. The backend error, if
    /// any, is still returned.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _loading = self.begin_loading();
        let result = self.inner.gateway.sign_out().await;
        if let Err(e) = &result {
            warn!(error = %e, "backend sign out failed; clearing local session anyway");
        }
        self.apply_session(None).await;
        result
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let _op = self.inner.inflight.try_begin(Operation::ResetPassword)?;
        let _loading = self.begin_loading();
        self.inner.gateway.reset_password(email).await
    }

    pub async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        let _op = self.inner.inflight.try_begin(Operation::ResendVerification)?;
        let _loading = self.begin_loading();
        self.inner.gateway.resend_verification(email).await
    }

    /// Rotate the session without touching `is_loading`. Any failure signs
    /// out. With no session on either side there is nothing to do.
    pub async fn refresh_session(&self) -> Result<(), AuthError> {
        let _op = self.inner.inflight.try_begin(Operation::RefreshSession)?;
        let result = match self.inner.gateway.refresh_session().await {
            Ok(None) => match self.readopt_held_session().await {
                Ok(true) => self.inner.gateway.refresh_session().await,
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            },
            other => other,
        };
        match result {
            Ok(Some(session)) => {
                self.apply_session(Some(session)).await;
                Ok(())
            }
            Ok(None) => {
                debug!("no session to refresh");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "session refresh failed; signing out");
                self.apply_session(None).await;
                Err(e)
            }
        }
    }

    /// The backend's view of the signed-in user, handing it the held
    /// session first if it has none (e.g. after an offline launch).
    pub async fn current_user(&self) -> Result<Option<User>, AuthError> {
        if let Some(user) = self.inner.gateway.current_user().await? {
            return Ok(Some(user));
        }
        if self.readopt_held_session().await? {
            return self.inner.gateway.current_user().await;
        }
        Ok(None)
    }

    /// Give the session this store holds back to a backend that lost it.
    /// `Ok(false)` when the store holds none.
    async fn readopt_held_session(&self) -> Result<bool, AuthError> {
        let held = self.inner.state.borrow().session.clone();
        let Some(held) = held else {
            return Ok(false);
        };
        let session = self.inner.gateway.restore_session(&held).await?;
        debug!("held session handed back to backend");
        self.apply_session(Some(session)).await;
        Ok(true)
    }

    /// Replace the session directly, e.g. from a deep-link handler.
    pub async fn set_session(&self, session: Option<Session>) {
        self.apply_session(session).await;
    }

    // =========================================================================
    // WRITER
    // =========================================================================

    fn begin_loading(&self) -> LoadingGuard {
        let mut active = self.inner.loading.lock().unwrap_or_else(PoisonError::into_inner);
        *active += 1;
        self.inner.state.send_modify(|state| state.is_loading = true);
        LoadingGuard { inner: Arc::clone(&self.inner) }
    }

    /// The only writer of `{user, session}`.
    async fn apply_session(&self, session: Option<Session>) {
        let _writer = self.inner.writer.lock().await;
        let snapshot = PersistedAuth { user: session.as_ref().map(|s| s.user.clone()), session };

        self.inner.state.send_if_modified(|state| {
            if state.user == snapshot.user && state.session == snapshot.session {
                return false;
            }
            state.user.clone_from(&snapshot.user);
            state.session.clone_from(&snapshot.session);
            true
        });

        if let Err(e) = self.inner.persister.save(&snapshot).await {
            warn!(error = %e, "failed to persist auth snapshot");
        }
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
