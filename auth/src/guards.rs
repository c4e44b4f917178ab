//! Route guards.
//!
//! DESIGN
//! ======
//! Guards are pure functions of a [`GuardView`] snapshot. They never call
//! the store or the backend; navigation reacts to store changes by
//! re-evaluating the guard. Guards are a UX affordance only. Access control
//! is enforced by the backend.

use std::fmt;

use crate::phase::AuthPhase;
use crate::store::{AuthState, SignUpOutcome};

/// Navigation targets the guards can redirect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Welcome,
    Login,
    Register,
    VerifyEmail,
    ResetPassword,
    MainTabs,
}

impl Route {
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Welcome => "/(auth)/welcome",
            Self::Login => "/(auth)/login",
            Self::Register => "/(auth)/register",
            Self::VerifyEmail => "/(auth)/verify-email",
            Self::ResetPassword => "/(auth)/reset-password",
            Self::MainTabs => "/(tabs)",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// The slice of store state guards read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardView {
    pub phase: AuthPhase,
    pub is_loading: bool,
}

impl From<&AuthState> for GuardView {
    fn from(state: &AuthState) -> Self {
        Self { phase: AuthPhase::of(state), is_loading: state.is_loading }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Loading,
    Redirect(Route),
    Render,
}

/// What a guarded screen ends up showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered<T> {
    Loading,
    Redirect(Route),
    Children(T),
}

pub trait RouteGuard {
    fn decide(&self, view: GuardView) -> GuardDecision;

    /// Evaluate the guard, building `children` only when they are shown.
    fn render<T, F>(&self, view: GuardView, children: F) -> Rendered<T>
    where
        Self: Sized,
        F: FnOnce() -> T,
    {
        match self.decide(view) {
            GuardDecision::Loading => Rendered::Loading,
            GuardDecision::Redirect(route) => Rendered::Redirect(route),
            GuardDecision::Render => Rendered::Children(children()),
        }
    }
}

/// Screens for signed-out users: welcome, login, register.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuestOnly;

impl RouteGuard for GuestOnly {
    // The form stays up while its own request is loading.
    fn decide(&self, view: GuardView) -> GuardDecision {
        match view.phase {
            AuthPhase::Initializing => GuardDecision::Loading,
            AuthPhase::Authenticated => GuardDecision::Redirect(Route::MainTabs),
            AuthPhase::Unauthenticated | AuthPhase::AuthenticatedUnconfirmed => GuardDecision::Render,
        }
    }
}

/// Screens for signed-in, confirmed users.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireAuth;

impl RouteGuard for RequireAuth {
    fn decide(&self, view: GuardView) -> GuardDecision {
        if view.phase == AuthPhase::Initializing || view.is_loading {
            return GuardDecision::Loading;
        }
        if view.phase.is_authenticated() {
            GuardDecision::Render
        } else {
            GuardDecision::Redirect(Route::Welcome)
        }
    }
}

/// The index route: always sends the user somewhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootRedirect;

impl RouteGuard for RootRedirect {
    fn decide(&self, view: GuardView) -> GuardDecision {
        if view.phase == AuthPhase::Initializing || view.is_loading {
            return GuardDecision::Loading;
        }
        if view.phase.is_authenticated() {
            GuardDecision::Redirect(Route::MainTabs)
        } else {
            GuardDecision::Redirect(Route::Welcome)
        }
    }
}

/// Where the register screen navigates after a successful sign-up.
#[must_use]
pub fn route_after_sign_up(outcome: SignUpOutcome) -> Route {
    if outcome.needs_verification { Route::VerifyEmail } else { Route::MainTabs }
}

#[cfg(test)]
#[path = "guards_test.rs"]
mod tests;
