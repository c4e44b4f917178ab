//! Auth configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorCode;
use crate::federated::Platform;

pub const DEFAULT_STORAGE_DIR: &str = ".divetribe";
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;
pub const DEFAULT_EMAIL_COOLDOWN_SECS: u64 = 60;
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 90;
pub const DEFAULT_REFRESH_TICK_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "E_CONFIG_MISSING",
            Self::Invalid { .. } => "E_CONFIG_INVALID",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Client-side credential rules checked before any network submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPolicy {
    pub min_password_len: usize,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self { min_password_len: DEFAULT_MIN_PASSWORD_LEN }
    }
}

/// Token refresh schedule for backends that rotate sessions on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    /// Refresh once the session expires within this margin.
    pub margin: Duration,
    /// How often the expiry is checked.
    pub tick: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Base URL of the hosted project, without trailing slash.
    pub supabase_url: String,
    pub anon_key: String,
    pub platform: Platform,
    pub storage_dir: PathBuf,
    pub credentials: CredentialPolicy,
    pub email_cooldown: Duration,
    pub refresh: RefreshSchedule,
    pub timeouts: HttpTimeouts,
}

impl AuthConfig {
    /// Build typed auth config from environment variables.
    ///
    /// Required:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_ANON_KEY`
    ///
    /// Optional:
    /// - `AUTH_PLATFORM`: `ios`, `android`, `web`, `desktop` (default: compile target)
    /// - `AUTH_STORAGE_DIR`: default `.divetribe`
    /// - `AUTH_MIN_PASSWORD_LEN`: default 8
    /// - `AUTH_EMAIL_COOLDOWN_SECS`: default 60
    /// - `AUTH_REFRESH_MARGIN_SECS`: default 90
    /// - `AUTH_REFRESH_TICK_SECS`: default 30
    /// - `AUTH_REQUEST_TIMEOUT_SECS`: default 30
    /// - `AUTH_CONNECT_TIMEOUT_SECS`: default 10
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuthConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let supabase_url = required(&lookup, "SUPABASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let anon_key = required(&lookup, "SUPABASE_ANON_KEY")?;

        let platform = match lookup("AUTH_PLATFORM") {
            Some(raw) => raw
                .parse::<Platform>()
                .map_err(|_| ConfigError::Invalid { var: "AUTH_PLATFORM", value: raw })?,
            None => Platform::current(),
        };
        let storage_dir = lookup("AUTH_STORAGE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR), PathBuf::from);

        let min_password_len = parse_or(&lookup, "AUTH_MIN_PASSWORD_LEN", DEFAULT_MIN_PASSWORD_LEN)?;
        if min_password_len == 0 {
            return Err(ConfigError::Invalid { var: "AUTH_MIN_PASSWORD_LEN", value: "0".into() });
        }

        Ok(Self {
            supabase_url,
            anon_key,
            platform,
            storage_dir,
            credentials: CredentialPolicy { min_password_len },
            email_cooldown: Duration::from_secs(parse_or(
                &lookup,
                "AUTH_EMAIL_COOLDOWN_SECS",
                DEFAULT_EMAIL_COOLDOWN_SECS,
            )?),
            refresh: RefreshSchedule {
                margin: Duration::from_secs(parse_or(&lookup, "AUTH_REFRESH_MARGIN_SECS", DEFAULT_REFRESH_MARGIN_SECS)?),
                tick: Duration::from_secs(
                    parse_or(&lookup, "AUTH_REFRESH_TICK_SECS", DEFAULT_REFRESH_TICK_SECS)?.max(1),
                ),
            },
            timeouts: HttpTimeouts {
                request_secs: parse_or(&lookup, "AUTH_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
                connect_secs: parse_or(&lookup, "AUTH_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
            },
        })
    }
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
