//! Tests for error display

use resilience_core::core::ResilienceError;
use std::time::Duration;

#[test]
fn test_registration_closed_display() {
    let err = ResilienceError::RegistrationClosed("metrics".into());
    assert_eq!(
        err.to_string(),
        "handler `metrics` rejected: shutdown already in progress"
    );
}

#[test]
fn test_handler_failed_display() {
    let err = ResilienceError::HandlerFailed {
        name: "flush".into(),
        reason: "broken pipe".into(),
    };
    assert_eq!(err.to_string(), "handler `flush` failed: broken pipe");
}

#[test]
fn test_pool_errors_convert_to_anyhow() {
    fn checkout() -> resilience_core::core::AppResult<()> {
        Err(ResilienceError::PoolTimeout(Duration::from_secs(30)).into())
    }
    let err = checkout().unwrap_err();
    assert!(err.downcast_ref::<ResilienceError>().is_some());
    assert!(err.to_string().contains("30s"));
}
