use super::*;
use crate::test_helpers;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("divetribe-storage-{}", Uuid::new_v4()))
}

fn snapshot(confirmed: bool) -> PersistedAuth {
    let session = test_helpers::sample_session(confirmed);
    PersistedAuth { user: Some(session.user.clone()), session: Some(session) }
}

// =============================================================================
// decode_snapshot
// =============================================================================

#[test]
fn current_envelope_decodes() {
    let expected = snapshot(true);
    let raw = serde_json::to_string(&serde_json::json!({ "version": 1, "state": expected })).unwrap();
    assert_eq!(decode_snapshot(&raw).unwrap(), expected);
}

#[test]
fn legacy_camel_case_envelope_migrates() {
    let raw = r#"{
        "state": {
            "user": {
                "id": "u-1",
                "email": "alice@example.com",
                "emailConfirmed": true,
                "lastSignInAt": "2024-05-02T10:00:00.123456Z",
                "createdAt": "2024-05-01T09:00:00Z"
            },
            "session": {
                "accessToken": "a",
                "refreshToken": "r",
                "expiresAt": 1714650000,
                "user": {
                    "id": "u-1",
                    "email": "alice@example.com",
                    "emailConfirmed": true,
                    "createdAt": "2024-05-01T09:00:00Z"
                }
            }
        },
        "version": 0
    }"#;
    let migrated = decode_snapshot(raw).unwrap();
    let session = migrated.session.unwrap();
    assert_eq!(session.access_token, "a");
    assert_eq!(session.expires_at, 1_714_650_000);
    assert!(session.user.email_confirmed);
    let user = migrated.user.unwrap();
    assert_eq!(user.id.as_str(), "u-1");
    assert!(user.last_sign_in_at.is_some());
}

#[test]
fn unversioned_payload_is_treated_as_legacy() {
    let raw = r#"{"user": null, "session": null}"#;
    assert_eq!(decode_snapshot(raw).unwrap(), PersistedAuth::default());
}

#[test]
fn newer_version_is_rejected() {
    let raw = r#"{"version": 2, "state": {"user": null, "session": null}}"#;
    assert!(decode_snapshot(raw).unwrap_err().contains("newer"));
}

#[test]
fn garbage_is_rejected() {
    assert!(decode_snapshot("not json").is_err());
    assert!(decode_snapshot(r#"{"version": "one"}"#).is_err());
    assert!(decode_snapshot(r#"{"version": 1, "state": {"session": 7}}"#).is_err());
}

// =============================================================================
// persister
// =============================================================================

#[tokio::test]
async fn save_then_load_preserves_every_field() {
    let storage = Arc::new(MemoryStorage::new());
    let persister = SnapshotPersister::new(storage.clone());
    let expected = snapshot(true);

    persister.save(&expected).await.unwrap();
    let raw = storage.get_item(STORAGE_KEY).await.unwrap().unwrap();
    assert!(raw.contains(r#""version":1"#));

    let reloaded = SnapshotPersister::new(storage).load().await;
    assert_eq!(reloaded, expected);
}

#[tokio::test]
async fn saving_empty_snapshot_removes_entry() {
    let storage = Arc::new(MemoryStorage::new());
    let persister = SnapshotPersister::new(storage.clone());
    persister.save(&snapshot(true)).await.unwrap();

    persister.save(&PersistedAuth::default()).await.unwrap();
    assert_eq!(storage.get_item(STORAGE_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn undecodable_snapshot_loads_as_signed_out() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(STORAGE_KEY, "{{{").await.unwrap();
    assert_eq!(SnapshotPersister::new(storage).load().await, PersistedAuth::default());
}

#[tokio::test]
async fn custom_key_is_isolated() {
    let storage = Arc::new(MemoryStorage::new());
    SnapshotPersister::new(storage.clone())
        .with_key("other")
        .save(&snapshot(false))
        .await
        .unwrap();
    assert_eq!(SnapshotPersister::new(storage).load().await, PersistedAuth::default());
}

// =============================================================================
// file storage
// =============================================================================

#[tokio::test]
async fn file_storage_round_trips_and_removes() {
    let dir = temp_dir();
    let storage = FileStorage::new(&dir);

    assert_eq!(storage.get_item("k").await.unwrap(), None);
    storage.set_item("k", "v1").await.unwrap();
    storage.set_item("k", "v2").await.unwrap();
    assert_eq!(storage.get_item("k").await.unwrap().as_deref(), Some("v2"));

    storage.remove_item("k").await.unwrap();
    storage.remove_item("k").await.unwrap();
    assert_eq!(storage.get_item("k").await.unwrap(), None);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn file_storage_leaves_no_temp_files() {
    let dir = temp_dir();
    let storage = FileStorage::new(&dir);
    storage.set_item(STORAGE_KEY, "{}").await.unwrap();

    let names: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![format!("{STORAGE_KEY}.json")]);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn file_names_are_sanitized() {
    let storage = FileStorage::new("/tmp/x");
    assert_eq!(storage.path_for("../etc/passwd"), PathBuf::from("/tmp/x/___etc_passwd.json"));
    assert_eq!(storage.dir(), Path::new("/tmp/x"));
}

#[tokio::test]
async fn persister_over_files_survives_restart() {
    let dir = temp_dir();
    let expected = snapshot(true);
    SnapshotPersister::new(Arc::new(FileStorage::new(&dir)))
        .save(&expected)
        .await
        .unwrap();

    let reloaded = SnapshotPersister::new(Arc::new(FileStorage::new(&dir))).load().await;
    assert_eq!(reloaded, expected);

    let _ = std::fs::remove_dir_all(dir);
}
