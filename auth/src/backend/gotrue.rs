//! Hosted auth service client (GoTrue REST API).
//!
//! Thin HTTP wrapper over `/auth/v1`. Response parsing lives in pure
//! functions (`parse_session`, `parse_sign_up`, `parse_error`) so it can be
//! tested without a server.
//!
//! ERROR HANDLING
//! ==============
//! A refresh rejected by the service drops the local session and emits
//! `SignedOut`: the refresh token is dead and nothing can revive it. A
//! refresh that never reached the service keeps the session, since the
//! tokens may still be good once connectivity returns.

use std::sync::{Arc, Weak};
use std::time::Duration;

use reqwest::Method;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{
    AuthBackend, BackendError, RawSession, RawSignUp, RawUser, SessionCell, SessionChange, SessionEvent, StoredTokens,
};
use crate::config::{AuthConfig, RefreshSchedule};
use crate::federated::ProviderKind;
use crate::session::now_epoch_secs;

const AUTH_PATH: &str = "/auth/v1";

// =============================================================================
// CLIENT
// =============================================================================

pub struct GoTrueBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    cell: SessionCell,
}

impl GoTrueBackend {
    /// Build a client for the project at `config.supabase_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: format!("{}{AUTH_PATH}", config.supabase_url),
            anon_key: config.anon_key.clone(),
            cell: SessionCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Result<String, BackendError> {
        let mut request = self
            .http
            .request(method, self.endpoint(path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(parse_error(status, &text));
        }
        Ok(text)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<RawUser, BackendError> {
        let text = self.send(Method::GET, "/user", Some(access_token), None).await?;
        parse_user(&text)
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<RawSession, BackendError> {
        let result = self
            .send(
                Method::POST,
                "/token?grant_type=refresh_token",
                None,
                Some(json!({ "refresh_token": refresh_token })),
            )
            .await
            .and_then(|text| parse_session(&text, now_epoch_secs()));

        match result {
            Ok(session) => {
                self.cell.replace(SessionEvent::TokenRefreshed, Some(session.clone()));
                Ok(session)
            }
            Err(err @ BackendError::Api { .. }) => {
                warn!(error = %err, "refresh rejected; dropping session");
                self.cell.clear();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Spawn a task that rotates the session shortly before it expires.
    ///
    /// The task holds a weak reference and exits once the backend is dropped.
    pub fn spawn_auto_refresh(self: &Arc<Self>, schedule: RefreshSchedule) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let margin = i64::try_from(schedule.margin.as_secs()).unwrap_or(i64::MAX);
        info!(margin_secs = margin, tick_secs = schedule.tick.as_secs(), "session auto-refresh configured");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(schedule.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(backend) = weak.upgrade() else {
                    break;
                };
                let Some(current) = backend.cell.current() else {
                    continue;
                };
                if !current.expires_within(now_epoch_secs(), margin) {
                    continue;
                }
                match backend.refresh_with(&current.refresh_token).await {
                    Ok(_) => debug!("session auto-refreshed"),
                    Err(e) => warn!(error = %e, "session auto-refresh failed"),
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl AuthBackend for GoTrueBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<RawSession, BackendError> {
        let text = self
            .send(
                Method::POST,
                "/token?grant_type=password",
                None,
                Some(json!({ "email": email, "password": password })),
            )
            .await?;
        let session = parse_session(&text, now_epoch_secs())?;
        self.cell.replace(SessionEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<RawSignUp, BackendError> {
        let text = self
            .send(Method::POST, "/signup", None, Some(json!({ "email": email, "password": password })))
            .await?;
        let result = parse_sign_up(&text, now_epoch_secs())?;
        if let Some(session) = &result.session {
            self.cell.replace(SessionEvent::SignedIn, Some(session.clone()));
        }
        Ok(result)
    }

    async fn sign_in_with_id_token(
        &self,
        provider: ProviderKind,
        id_token: &str,
    ) -> Result<RawSession, BackendError> {
        let text = self
            .send(
                Method::POST,
                "/token?grant_type=id_token",
                None,
                Some(json!({ "provider": provider.as_str(), "id_token": id_token })),
            )
            .await?;
        let session = parse_session(&text, now_epoch_secs())?;
        self.cell.replace(SessionEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let Some(current) = self.cell.current() else {
            return Ok(());
        };
        let result = self
            .send(Method::POST, "/logout", Some(&current.access_token), None)
            .await;
        self.cell.clear();
        match result {
            Ok(_) => Ok(()),
            // The service already forgot this session.
            Err(BackendError::Api { status: Some(401 | 403 | 404), .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), BackendError> {
        self.send(Method::POST, "/recover", None, Some(json!({ "email": email })))
            .await
            .map(|_| ())
    }

    async fn resend_signup_confirmation(&self, email: &str) -> Result<(), BackendError> {
        self.send(Method::POST, "/resend", None, Some(json!({ "type": "signup", "email": email })))
            .await
            .map(|_| ())
    }

    async fn get_session(&self) -> Result<Option<RawSession>, BackendError> {
        match self.cell.current() {
            Some(current) if current.expires_within(now_epoch_secs(), 0) => {
                self.refresh_with(&current.refresh_token).await.map(Some)
            }
            other => Ok(other),
        }
    }

    async fn get_user(&self) -> Result<Option<RawUser>, BackendError> {
        let Some(current) = self.cell.current() else {
            return Ok(None);
        };
        self.fetch_user(&current.access_token).await.map(Some)
    }

    async fn refresh_session(&self) -> Result<Option<RawSession>, BackendError> {
        match self.cell.current() {
            Some(current) => self.refresh_with(&current.refresh_token).await.map(Some),
            None => Ok(None),
        }
    }

    async fn restore_session(&self, tokens: StoredTokens) -> Result<RawSession, BackendError> {
        if tokens.expires_within(now_epoch_secs(), 0) {
            return self.refresh_with(&tokens.refresh_token).await;
        }
        let user = self.fetch_user(&tokens.access_token).await?;
        let restored = tokens.into_session(user);
        self.cell.replace(SessionEvent::SignedIn, Some(restored.clone()));
        Ok(restored)
    }

    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionChange> {
        self.cell.subscribe()
    }
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_session(json: &str, now: i64) -> Result<RawSession, BackendError> {
    let session: RawSession = serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))?;
    Ok(session.with_absolute_expiry(now))
}

fn parse_user(json: &str) -> Result<RawUser, BackendError> {
    serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))
}

/// Sign-up answers with a session when no confirmation is pending, and with
/// the bare user record (or `{ "user": .. }`) otherwise.
fn parse_sign_up(json: &str, now: i64) -> Result<RawSignUp, BackendError> {
    let value: Value = serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))?;
    if value.get("access_token").is_some() {
        let session = parse_session(json, now)?;
        return Ok(RawSignUp { user: Some(session.user.clone()), session: Some(session) });
    }

    let user_value = match value.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => value,
    };
    let user = serde_json::from_value(user_value).map_err(|e| BackendError::Parse(e.to_string()))?;
    Ok(RawSignUp { user: Some(user), session: None })
}

fn parse_error(status: u16, body: &str) -> BackendError {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        let trimmed = body.trim();
        let message = if trimmed.is_empty() { format!("HTTP {status}") } else { trimmed.to_owned() };
        return BackendError::Api { status: Some(status), code: None, message };
    };

    let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_owned);
    let message = ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| field(key))
        .unwrap_or_else(|| format!("HTTP {status}"));
    let code = ["error_code", "error", "code"].iter().find_map(|key| field(key));

    BackendError::Api { status: Some(status), code, message }
}

#[cfg(test)]
#[path = "gotrue_test.rs"]
mod tests;
