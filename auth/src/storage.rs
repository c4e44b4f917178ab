//! Durable storage for the auth snapshot.
//!
//! DESIGN
//! ======
//! Storage is a string key-value boundary ([`KeyValueStorage`]) so the same
//! persister runs over a file directory, platform secure storage or memory.
//! Only `{user, session}` are written; transient flags never reach disk.
//!
//! Snapshots are wrapped in a versioned envelope `{ "version", "state" }`.
//! Version 0 is the camelCase layout written by earlier app releases and is
//! migrated on load. A version from a newer release, or a payload that does
//! not decode, is discarded and the app starts signed out.
//!
//! ERROR HANDLING
//! ==============
//! `load` never fails: a missing, unreadable or undecodable snapshot means
//! "signed out". `save` and `clear` report storage errors so callers can
//! log them; in-memory state stays authoritative either way.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::session::{Session, User, UserId};

pub const STORAGE_KEY: &str = "divetribe-auth-storage";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_STORAGE_IO",
            Self::Serde(_) => "E_STORAGE_ENCODING",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

// =============================================================================
// KEY-VALUE BOUNDARY
// =============================================================================

#[async_trait::async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait::async_trait]
impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temp file and rename, so a crash never leaves a
    /// half-written snapshot behind.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("json.tmp-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// The persisted slice of auth state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAuth {
    pub user: Option<User>,
    pub session: Option<Session>,
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    version: u32,
    state: &'a PersistedAuth,
}

pub struct SnapshotPersister {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl SnapshotPersister {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage, key: STORAGE_KEY.to_owned() }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Rehydrate the last snapshot, or the signed-out default.
    pub async fn load(&self) -> PersistedAuth {
        let raw = match self.storage.get_item(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return PersistedAuth::default(),
            Err(e) => {
                warn!(error = %e, key = %self.key, "auth snapshot unreadable; starting signed out");
                return PersistedAuth::default();
            }
        };
        match decode_snapshot(&raw) {
            Ok(snapshot) => {
                debug!(has_session = snapshot.session.is_some(), "auth snapshot rehydrated");
                snapshot
            }
            Err(reason) => {
                warn!(reason = %reason, key = %self.key, "discarding auth snapshot");
                PersistedAuth::default()
            }
        }
    }

    /// Persist `snapshot`, removing the entry when it holds nothing.
    pub async fn save(&self, snapshot: &PersistedAuth) -> Result<(), StorageError> {
        if snapshot.user.is_none() && snapshot.session.is_none() {
            return self.clear().await;
        }
        let raw = serde_json::to_string(&EnvelopeOut { version: SNAPSHOT_VERSION, state: snapshot })?;
        self.storage.set_item(&self.key, &raw).await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove_item(&self.key).await
    }
}

/// Decode a stored snapshot of any known version.
fn decode_snapshot(raw: &str) -> Result<PersistedAuth, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| format!("not json: {e}"))?;
    let version = match value.get("version") {
        None => 0,
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| format!("invalid version field: {v}"))?,
    };
    if version > SNAPSHOT_VERSION {
        return Err(format!("snapshot version {version} is newer than supported {SNAPSHOT_VERSION}"));
    }

    let state = match value {
        Value::Object(mut map) if map.contains_key("state") => map.remove("state").unwrap_or(Value::Null),
        other => other,
    };

    if version == SNAPSHOT_VERSION {
        return serde_json::from_value(state).map_err(|e| format!("invalid snapshot: {e}"));
    }
    let legacy: LegacyAuth = serde_json::from_value(state).map_err(|e| format!("invalid legacy snapshot: {e}"))?;
    let migrated = legacy.migrate()?;
    info!(from_version = version, to_version = SNAPSHOT_VERSION, "migrated auth snapshot");
    Ok(migrated)
}

// =============================================================================
// VERSION 0
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyUser {
    id: String,
    email: String,
    email_confirmed: bool,
    #[serde(default)]
    last_sign_in_at: Option<String>,
    created_at: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    user: LegacyUser,
}

#[derive(Deserialize)]
struct LegacyAuth {
    #[serde(default)]
    user: Option<LegacyUser>,
    #[serde(default)]
    session: Option<LegacySession>,
}

impl LegacyUser {
    fn migrate(self) -> Result<User, String> {
        let parse = |field: &str, at: &str| {
            OffsetDateTime::parse(at, &Rfc3339).map_err(|e| format!("invalid legacy {field}: {e}"))
        };
        Ok(User {
            id: UserId::new(self.id),
            email: self.email,
            email_confirmed: self.email_confirmed,
            last_sign_in_at: self
                .last_sign_in_at
                .as_deref()
                .map(|at| parse("lastSignInAt", at))
                .transpose()?,
            created_at: parse("createdAt", &self.created_at)?,
        })
    }
}

impl LegacyAuth {
    fn migrate(self) -> Result<PersistedAuth, String> {
        let session = self
            .session
            .map(|s| -> Result<Session, String> {
                Ok(Session {
                    access_token: s.access_token,
                    refresh_token: s.refresh_token,
                    expires_at: s.expires_at.unwrap_or(0),
                    user: s.user.migrate()?,
                })
            })
            .transpose()?;
        let user = self.user.map(LegacyUser::migrate).transpose()?;
        Ok(PersistedAuth { user, session })
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
