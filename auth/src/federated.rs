//! Platform federated sign-in boundary.
//!
//! DESIGN
//! ======
//! Native flows (Google, Apple) are injected as [`FederatedProvider`]
//! implementations. They only produce an opaque identity token; the gateway
//! exchanges it with the backend. Platform restrictions are checked before
//! the native flow starts.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Federated identity providers the app supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Google,
    Apple,
}

impl ProviderKind {
    /// Provider name as the backend expects it in id-token grants.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Apple => "apple",
        }
    }

    /// The single platform family a provider is restricted to, if any.
    #[must_use]
    pub fn required_platform(self) -> Option<Platform> {
        match self {
            Self::Google => None,
            Self::Apple => Some(Platform::Ios),
        }
    }

    #[must_use]
    pub fn available_on(self, platform: Platform) -> bool {
        self.required_platform().is_none_or(|required| required == platform)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Google => "Google",
            Self::Apple => "Apple",
        })
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "apple" => Ok(Self::Apple),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Platform family the client runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Ios,
    Android,
    Web,
    Desktop,
}

impl Platform {
    /// Best guess for the compile target.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "ios") {
            Self::Ios
        } else if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_arch = "wasm32") {
            Self::Web
        } else {
            Self::Desktop
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ios => "iOS",
            Self::Android => "Android",
            Self::Web => "web",
            Self::Desktop => "desktop",
        })
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            "web" => Ok(Self::Web),
            "desktop" => Ok(Self::Desktop),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Identity token yielded by a native flow. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct IdToken(String);

impl IdToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdToken(<redacted>)")
    }
}

/// Outcomes a native flow can report instead of a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FederatedError {
    #[error("flow cancelled by user")]
    Cancelled,
    #[error("flow already in progress")]
    InProgress,
    #[error("flow unavailable on this device")]
    Unavailable,
    #[error("flow completed without an identity token")]
    MissingToken,
    #[error("flow failed: {0}")]
    Failed(String),
}

/// A platform-native federated sign-in flow.
#[async_trait::async_trait]
pub trait FederatedProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether the device can run the flow at all (e.g. services installed).
    async fn is_available(&self) -> bool {
        true
    }

    /// Run the interactive flow and return the identity token.
    async fn obtain_id_token(&self) -> Result<IdToken, FederatedError>;
}

/// Provider for an identity token obtained out-of-band (e.g. passed on a
/// command line or handed over by a host app).
pub struct PreissuedTokenProvider {
    kind: ProviderKind,
    token: IdToken,
}

impl PreissuedTokenProvider {
    #[must_use]
    pub fn new(kind: ProviderKind, token: IdToken) -> Self {
        Self { kind, token }
    }
}

#[async_trait::async_trait]
impl FederatedProvider for PreissuedTokenProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn obtain_id_token(&self) -> Result<IdToken, FederatedError> {
        if self.token.expose().trim().is_empty() {
            return Err(FederatedError::MissingToken);
        }
        Ok(self.token.clone())
    }
}

/// Registered native flows plus the platform they run on.
#[derive(Clone)]
pub struct ProviderRegistry {
    platform: Platform,
    providers: HashMap<ProviderKind, Arc<dyn FederatedProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self { platform, providers: HashMap::new() }
    }

    /// Register a flow, replacing any earlier one for the same provider.
    #[must_use]
    pub fn with(mut self, provider: Arc<dyn FederatedProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn FederatedProvider>> {
        self.providers.get(&kind).cloned()
    }
}

#[cfg(test)]
#[path = "federated_test.rs"]
mod tests;
