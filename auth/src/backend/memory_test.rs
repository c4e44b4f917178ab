use super::*;

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "correct horse";

fn api_message(err: &BackendError) -> &str {
    match err {
        BackendError::Api { message, .. } => message,
        other => panic!("expected api error, got {other:?}"),
    }
}

#[test]
fn email_shape_check() {
    assert!(looks_like_email("a@b"));
    assert!(!looks_like_email("a@"));
    assert!(!looks_like_email("@b"));
    assert!(!looks_like_email("a@b@c"));
    assert!(!looks_like_email("plain"));
}

#[test]
fn password_digest_depends_on_salt() {
    assert_eq!(hash_password("s1", "pw"), hash_password("s1", "pw"));
    assert_ne!(hash_password("s1", "pw"), hash_password("s2", "pw"));
    assert_eq!(hash_password("s1", "pw").len(), 64);
}

#[tokio::test]
async fn sign_in_issues_session_for_confirmed_account() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);

    let session = backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(session.user.email.as_deref(), Some(EMAIL));
    assert!(session.user.last_sign_in_at.is_some());
    assert!(session.expires_at.is_some());
    assert_eq!(backend.current_session(), Some(session));
}

#[tokio::test]
async fn sign_in_rejects_wrong_password_and_unknown_email() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);

    let err = backend.sign_in_with_password(EMAIL, "nope").await.unwrap_err();
    assert_eq!(api_message(&err), "Invalid login credentials");
    let err = backend.sign_in_with_password("bob@example.com", PASSWORD).await.unwrap_err();
    assert_eq!(api_message(&err), "Invalid login credentials");
    assert!(backend.current_session().is_none());
}

#[tokio::test]
async fn sign_in_rejects_unconfirmed_account() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, false);

    let err = backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap_err();
    assert_eq!(api_message(&err), "Email not confirmed");

    backend.confirm_email(EMAIL);
    assert!(backend.sign_in_with_password(EMAIL, PASSWORD).await.is_ok());
}

#[tokio::test]
async fn sign_up_without_confirmation_returns_user_only() {
    let backend = MemoryBackend::new();
    let result = backend.sign_up(EMAIL, PASSWORD).await.unwrap();
    assert!(result.session.is_none());
    let user = result.user.unwrap();
    assert!(user.email_confirmed_at.is_none());
    assert!(backend.current_session().is_none());
}

#[tokio::test]
async fn sign_up_with_auto_confirm_issues_session() {
    let backend = MemoryBackend::new().with_confirmation_required(false);
    let result = backend.sign_up(EMAIL, PASSWORD).await.unwrap();
    let session = result.session.unwrap();
    assert!(session.user.email_confirmed_at.is_some());
    assert_eq!(backend.current_session(), Some(session));
}

#[tokio::test]
async fn sign_up_rejects_duplicates_and_weak_input() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);

    let err = backend.sign_up(EMAIL, PASSWORD).await.unwrap_err();
    assert_eq!(api_message(&err), "User already registered");
    let err = backend.sign_up("bob@example.com", "abc").await.unwrap_err();
    assert_eq!(api_message(&err), "Password should be at least 6 characters");
    let err = backend.sign_up("bob", PASSWORD).await.unwrap_err();
    assert_eq!(api_message(&err), "Unable to validate email address: invalid format");
}

#[tokio::test]
async fn id_token_sign_in_creates_confirmed_account() {
    let backend = MemoryBackend::new();
    backend.register_identity(ProviderKind::Google, "google-token", EMAIL);

    let session = backend
        .sign_in_with_id_token(ProviderKind::Google, "google-token")
        .await
        .unwrap();
    assert!(session.user.email_confirmed_at.is_some());

    let err = backend
        .sign_in_with_id_token(ProviderKind::Apple, "google-token")
        .await
        .unwrap_err();
    assert_eq!(api_message(&err), "Bad ID token");
}

#[tokio::test]
async fn refresh_rotates_tokens_and_invalidates_old_ones() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);
    let first = backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();
    let mut rx = backend.subscribe();

    let second = backend.refresh_session().await.unwrap().unwrap();
    assert_ne!(first.access_token, second.access_token);
    assert_ne!(first.refresh_token, second.refresh_token);
    assert_eq!(rx.recv().await.unwrap().event, SessionEvent::TokenRefreshed);

    // The rotated-out session cannot be restored.
    let err = backend.restore_session(StoredTokens::from(&first)).await.unwrap_err();
    assert_eq!(api_message(&err), "Session not found");
}

#[tokio::test]
async fn refresh_without_session_is_none() {
    let backend = MemoryBackend::new();
    assert_eq!(backend.refresh_session().await.unwrap(), None);
}

#[tokio::test]
async fn refresh_after_revocation_clears_session() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);
    backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();
    let mut rx = backend.subscribe();
    backend.revoke_sessions(EMAIL);

    let err = backend.refresh_session().await.unwrap_err();
    assert_eq!(api_message(&err), "Invalid Refresh Token: Refresh Token Not Found");
    assert!(backend.current_session().is_none());
    assert_eq!(rx.recv().await.unwrap().event, SessionEvent::SignedOut);
}

#[tokio::test]
async fn get_session_refreshes_expired_session() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);
    let first = backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();
    backend.expire_current();

    let current = backend.get_session().await.unwrap().unwrap();
    assert_ne!(current.access_token, first.access_token);
    assert!(!current.expires_within(now_epoch_secs(), 0));
}

#[tokio::test]
async fn get_user_reflects_out_of_band_confirmation() {
    let backend = MemoryBackend::new().with_confirmation_required(false);
    backend.seed_account(EMAIL, PASSWORD, false);
    backend.register_identity(ProviderKind::Google, "t", EMAIL);
    // Signed in through the provider, then the password account gets confirmed.
    backend.sign_in_with_id_token(ProviderKind::Google, "t").await.unwrap();
    backend.confirm_email(EMAIL);

    let user = backend.get_user().await.unwrap().unwrap();
    assert!(user.email_confirmed_at.is_some());
}

#[tokio::test]
async fn restore_session_adopts_live_session() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);
    let session = backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();
    backend.sign_out().await.unwrap();

    // sign_out revoked the tokens, so a fresh session is needed.
    let err = backend.restore_session(StoredTokens::from(&session)).await.unwrap_err();
    assert!(matches!(err, BackendError::Api { status: Some(401), .. }));

    let session = backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();
    let restored = backend.restore_session(StoredTokens::from(&session)).await.unwrap();
    assert_eq!(restored.access_token, session.access_token);
}

#[tokio::test]
async fn sign_out_clears_and_notifies() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);
    backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();
    let mut rx = backend.subscribe();

    backend.sign_out().await.unwrap();
    assert!(backend.current_session().is_none());
    assert_eq!(rx.recv().await.unwrap().event, SessionEvent::SignedOut);

    // Idempotent.
    backend.sign_out().await.unwrap();
}

#[tokio::test]
async fn email_sends_are_rate_limited_per_address() {
    let backend = MemoryBackend::new();
    backend.reset_password_for_email(EMAIL).await.unwrap();

    let err = backend.reset_password_for_email(EMAIL).await.unwrap_err();
    assert!(matches!(err, BackendError::Api { status: Some(429), .. }));
    assert!(backend.resend_signup_confirmation("bob@example.com").await.is_ok());
}

#[tokio::test]
async fn zero_email_interval_allows_repeat_sends() {
    let backend = MemoryBackend::new().with_email_interval(Duration::ZERO);
    backend.reset_password_for_email(EMAIL).await.unwrap();
    backend.reset_password_for_email(EMAIL).await.unwrap();
}

#[tokio::test]
async fn injected_failures_are_consumed_once_and_calls_counted() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);
    backend.fail_next(BackendOp::SignIn, BackendError::Transport("offline".into()));

    let err = backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap_err();
    assert_eq!(err, BackendError::Transport("offline".into()));
    assert!(backend.sign_in_with_password(EMAIL, PASSWORD).await.is_ok());
    assert_eq!(backend.calls(BackendOp::SignIn), 2);
    assert_eq!(backend.calls(BackendOp::SignUp), 0);
}

#[tokio::test]
async fn restart_keeps_tokens_valid() {
    let backend = MemoryBackend::new();
    backend.seed_account(EMAIL, PASSWORD, true);
    let session = backend.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();

    backend.simulate_restart();
    assert_eq!(backend.get_session().await.unwrap(), None);
    let restored = backend.restore_session(StoredTokens::from(&session)).await.unwrap();
    assert_eq!(restored.refresh_token, session.refresh_token);
    assert_eq!(backend.current_session(), Some(restored));
}
