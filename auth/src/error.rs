//! Auth error taxonomy.
//!
//! DESIGN
//! ======
//! Failures are an enumerated kind internally; the user-facing sentence is
//! only produced at the edge through `Display`. Expected failures are
//! returned as values, never raised. Unclassified backend messages land in
//! [`AuthError::Unexpected`] and keep their raw text for diagnostics only.

use std::fmt;

use crate::federated::{Platform, ProviderKind};
use crate::inflight::Operation;

/// Stable machine-readable code plus a retry hint for an error.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Fieldless discriminant of [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    InvalidCredentials,
    UnconfirmedIdentity,
    DuplicateRegistration,
    Validation,
    RateLimited,
    Network,
    Cancelled,
    Unavailable,
    InProgress,
    SessionExpired,
    Unexpected,
}

/// Input rejected before anything is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter a valid email address.")]
    InvalidEmail,
    #[error("Please enter your password.")]
    EmptyPassword,
    #[error("Password must be at least {min} characters long.")]
    PasswordTooShort { min: usize },
}

/// What was throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Requests,
    Emails,
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requests => "Too many attempts. Please wait a moment before trying again.",
            Self::Emails => "Too many emails sent. Please wait before requesting another.",
        })
    }
}

/// Why a federated flow cannot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    UnsupportedPlatform { required: Platform },
    DeviceUnsupported,
    NotConfigured,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPlatform { required } => write!(f, "only available on {required}"),
            Self::DeviceUnsupported => f.write_str("not available on this device"),
            Self::NotConfigured => f.write_str("not configured for this app"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password. Please check your credentials and try again.")]
    InvalidCredentials,

    #[error("Please verify your email address before signing in.")]
    UnconfirmedIdentity,

    #[error("An account with this email already exists. Please sign in instead.")]
    DuplicateRegistration,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{scope}")]
    RateLimited { scope: RateLimitScope, retry_after_secs: Option<u64> },

    /// Transport-level failure. The detail is for logs, not for display.
    #[error("Network error. Please check your connection and try again.")]
    Network(String),

    #[error("{0} sign in was cancelled.")]
    Cancelled(ProviderKind),

    #[error("{provider} Sign-In is {reason}.")]
    Unavailable { provider: ProviderKind, reason: UnavailableReason },

    #[error("{0} is already in progress.")]
    InProgress(Operation),

    #[error("Your session has expired. Please sign in again.")]
    SessionExpired,

    /// Unclassified failure. The detail is for logs, not for display.
    #[error("An unexpected error occurred. Please try again.")]
    Unexpected(String),
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::InvalidCredentials => AuthErrorKind::InvalidCredentials,
            Self::UnconfirmedIdentity => AuthErrorKind::UnconfirmedIdentity,
            Self::DuplicateRegistration => AuthErrorKind::DuplicateRegistration,
            Self::Validation(_) => AuthErrorKind::Validation,
            Self::RateLimited { .. } => AuthErrorKind::RateLimited,
            Self::Network(_) => AuthErrorKind::Network,
            Self::Cancelled(_) => AuthErrorKind::Cancelled,
            Self::Unavailable { .. } => AuthErrorKind::Unavailable,
            Self::InProgress(_) => AuthErrorKind::InProgress,
            Self::SessionExpired => AuthErrorKind::SessionExpired,
            Self::Unexpected(_) => AuthErrorKind::Unexpected,
        }
    }

    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// False for outcomes the UI should swallow silently (user cancellation).
    #[must_use]
    pub fn should_display(&self) -> bool {
        !self.is_cancellation()
    }

    /// Raw diagnostic text, when the variant carries any.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Network(detail) | Self::Unexpected(detail) => Some(detail),
            _ => None,
        }
    }
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "E_INVALID_CREDENTIALS",
            Self::UnconfirmedIdentity => "E_UNCONFIRMED_IDENTITY",
            Self::DuplicateRegistration => "E_DUPLICATE_REGISTRATION",
            Self::Validation(_) => "E_VALIDATION",
            Self::RateLimited { .. } => "E_RATE_LIMITED",
            Self::Network(_) => "E_NETWORK",
            Self::Cancelled(_) => "E_CANCELLED",
            Self::Unavailable { .. } => "E_UNAVAILABLE",
            Self::InProgress(_) => "E_IN_PROGRESS",
            Self::SessionExpired => "E_SESSION_EXPIRED",
            Self::Unexpected(_) => "E_UNEXPECTED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::InProgress(_) | Self::Unexpected(_)
        )
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
