use super::*;

#[test]
fn second_claim_of_same_kind_is_rejected() {
    let flights = InFlight::new();
    let _guard = flights.try_begin(Operation::SignIn).unwrap();
    assert!(matches!(
        flights.try_begin(Operation::SignIn),
        Err(AuthError::InProgress(Operation::SignIn))
    ));
}

#[test]
fn different_kinds_do_not_conflict() {
    let flights = InFlight::new();
    let _a = flights.try_begin(Operation::SignIn).unwrap();
    let _b = flights.try_begin(Operation::SignUp).unwrap();
    let _c = flights.try_begin(Operation::Federated(ProviderKind::Google)).unwrap();
    assert!(flights.try_begin(Operation::Federated(ProviderKind::Apple)).is_ok());
}

#[test]
fn dropping_guard_releases_operation() {
    let flights = InFlight::new();
    let guard = flights.try_begin(Operation::RefreshSession).unwrap();
    assert!(flights.is_active(Operation::RefreshSession));
    drop(guard);
    assert!(!flights.is_active(Operation::RefreshSession));
    assert!(flights.try_begin(Operation::RefreshSession).is_ok());
}

#[test]
fn clones_share_the_same_set() {
    let flights = InFlight::new();
    let clone = flights.clone();
    let _guard = flights.try_begin(Operation::ResetPassword).unwrap();
    assert!(clone.is_active(Operation::ResetPassword));
}

#[test]
fn operation_display_names_provider() {
    assert_eq!(Operation::Federated(ProviderKind::Apple).to_string(), "Apple sign in");
    assert_eq!(Operation::SignIn.to_string(), "Sign in");
}
