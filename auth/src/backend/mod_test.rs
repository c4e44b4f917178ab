use super::*;
use crate::test_helpers;

#[test]
fn absolute_expiry_is_derived_from_lifetime() {
    let mut raw = test_helpers::raw_session("a@example.com", true);
    raw.expires_at = None;
    raw.expires_in = Some(3600);
    let raw = raw.with_absolute_expiry(1_000);
    assert_eq!(raw.expires_at, Some(4_600));
}

#[test]
fn absolute_expiry_keeps_explicit_value() {
    let mut raw = test_helpers::raw_session("a@example.com", true);
    raw.expires_at = Some(99);
    raw.expires_in = Some(3600);
    assert_eq!(raw.with_absolute_expiry(1_000).expires_at, Some(99));
}

#[test]
fn raw_session_debug_is_redacted() {
    let raw = test_helpers::raw_session("a@example.com", true);
    let rendered = format!("{raw:?}");
    assert!(!rendered.contains(&raw.access_token));
    assert!(!rendered.contains(&raw.refresh_token));
}

#[tokio::test]
async fn cell_replace_notifies_subscribers() {
    let cell = SessionCell::new();
    let mut rx = cell.subscribe();
    let raw = test_helpers::raw_session("a@example.com", true);

    cell.replace(SessionEvent::SignedIn, Some(raw.clone()));

    let change = rx.recv().await.unwrap();
    assert_eq!(change.event, SessionEvent::SignedIn);
    assert_eq!(change.session, Some(raw.clone()));
    assert_eq!(cell.current(), Some(raw));
}

#[tokio::test]
async fn cell_clear_only_notifies_when_session_existed() {
    let cell = SessionCell::new();
    let mut rx = cell.subscribe();

    cell.clear();
    assert!(rx.try_recv().is_err());

    cell.replace(SessionEvent::SignedIn, Some(test_helpers::raw_session("a@example.com", true)));
    let _ = rx.recv().await.unwrap();
    cell.clear();
    let change = rx.recv().await.unwrap();
    assert_eq!(change.event, SessionEvent::SignedOut);
    assert!(change.session.is_none());
    assert!(cell.current().is_none());
}

#[test]
fn subscriber_count_tracks_receivers() {
    let cell = SessionCell::new();
    assert_eq!(cell.subscriber_count(), 0);
    let rx = cell.subscribe();
    assert_eq!(cell.subscriber_count(), 1);
    drop(rx);
    assert_eq!(cell.subscriber_count(), 0);
}

#[tokio::test]
async fn cell_reset_is_silent() {
    let cell = SessionCell::new();
    cell.replace(SessionEvent::SignedIn, Some(test_helpers::raw_session("a@example.com", true)));
    let mut rx = cell.subscribe();
    cell.reset();
    assert!(cell.current().is_none());
    assert!(rx.try_recv().is_err());
}

#[test]
fn backend_error_codes_flag_transient_failures() {
    assert_eq!(BackendError::Transport("reset".into()).error_code(), "E_BACKEND_TRANSPORT");
    assert!(BackendError::Transport("reset".into()).retryable());
    assert!(BackendError::api(503, None, "unavailable").retryable());
    assert!(!BackendError::api(400, Some("invalid_credentials"), "Invalid login credentials").retryable());
    assert!(!BackendError::Parse("eof".into()).retryable());
}
