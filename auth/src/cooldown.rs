//! Client-side cooldown for outbound auth emails.
//!
//! DESIGN
//! ======
//! Password-reset and verification-resend emails are throttled by the
//! backend; a local window per (operation, email) stops the client from
//! spending requests it already knows will be refused. The window starts
//! only after a send succeeded, so a failed send can be retried at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{AuthError, RateLimitScope};
use crate::inflight::Operation;

#[derive(Clone)]
pub struct EmailCooldown {
    window: Duration,
    last_sent: Arc<Mutex<HashMap<(Operation, String), Instant>>>,
}

impl EmailCooldown {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, last_sent: Arc::new(Mutex::new(HashMap::new())) }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Fail with [`AuthError::RateLimited`] while a window is open for `email`.
    pub fn check(&self, op: Operation, email: &str) -> Result<(), AuthError> {
        self.check_at(op, email, Instant::now())
    }

    /// Start a new window for `email`.
    pub fn record(&self, op: Operation, email: &str) {
        self.record_at(op, email, Instant::now());
    }

    /// Internal: check with explicit timestamp (for testing).
    fn check_at(&self, op: Operation, email: &str, now: Instant) -> Result<(), AuthError> {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        let window = self.window;
        last_sent.retain(|_, sent| now.saturating_duration_since(*sent) < window);

        let Some(sent) = last_sent.get(&(op, email.to_owned())) else {
            return Ok(());
        };
        let remaining = window.saturating_sub(now.saturating_duration_since(*sent));
        Err(AuthError::RateLimited {
            scope: RateLimitScope::Emails,
            retry_after_secs: Some(remaining.as_secs().max(1)),
        })
    }

    fn record_at(&self, op: Operation, email: &str, now: Instant) {
        if self.window.is_zero() {
            return;
        }
        self.last_sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((op, email.to_owned()), now);
    }
}

#[cfg(test)]
#[path = "cooldown_test.rs"]
mod tests;
