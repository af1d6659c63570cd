//! Tests for file-based credential resolution and caching.
//!
//! Environment-variable resolution is exercised indirectly: the test
//! service names are deliberately outside the fixed env mapping so results
//! stay deterministic regardless of the host environment.

use std::fs;

use openclaw::credentials::CredentialService;
use openclaw::errors::CoreError;

fn write_master(dir: &std::path::Path, json: &str) {
    fs::write(dir.join("credentials.json"), json).expect("write master file");
}

#[test]
fn master_file_string_secret() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_master(dir.path(), r#"{"notion": "secret_abc123"}"#);

    let service = CredentialService::new(dir.path());
    assert_eq!(service.get("notion").as_deref(), Some("secret_abc123"));
    assert!(service.has("notion"));
}

#[test]
fn master_file_object_secret() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_master(dir.path(), r#"{"linear": {"api_key": "lin_key_9"}}"#);

    let service = CredentialService::new(dir.path());
    assert_eq!(service.get("linear").as_deref(), Some("lin_key_9"));
}

#[test]
fn token_file_fallback() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("gmail-token.json"),
        r#"{"access_token": "ya29.rotating"}"#,
    )
    .expect("write token file");

    let service = CredentialService::new(dir.path());
    assert_eq!(service.get("gmail-token").as_deref(), Some("ya29.rotating"));
}

#[test]
fn master_file_wins_over_token_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_master(dir.path(), r#"{"svc": "from-master"}"#);
    fs::write(dir.path().join("svc.json"), r#"{"token": "from-token-file"}"#)
        .expect("write token file");

    let service = CredentialService::new(dir.path());
    assert_eq!(service.get("svc").as_deref(), Some("from-master"));
}

#[test]
fn env_file_backs_the_environment_step() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(".env"), "HUME_API_KEY=hume-env-secret\n").expect("write .env");

    let service = CredentialService::new(dir.path());
    // The process environment wins when the variable is actually set there.
    let expected =
        std::env::var("HUME_API_KEY").unwrap_or_else(|_| "hume-env-secret".to_owned());
    assert_eq!(service.get("hume").as_deref(), Some(expected.as_str()));
}

#[test]
fn missing_credential_is_none_and_require_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = CredentialService::new(dir.path());

    assert_eq!(service.get("nothing-here"), None);
    assert!(!service.has("nothing-here"));

    let err = service.require("nothing-here").expect_err("must fail");
    assert!(matches!(err, CoreError::MissingCredential(name) if name == "nothing-here"));
}

#[test]
fn get_all_filters_by_prefix() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_master(
        dir.path(),
        r#"{"notion": "a", "notion-backup": "b", "linear": "c"}"#,
    );

    let service = CredentialService::new(dir.path());
    let matches = service.get_all("notion");
    assert_eq!(matches.len(), 2);
    assert_eq!(matches.get("notion").map(String::as_str), Some("a"));
    assert_eq!(matches.get("notion-backup").map(String::as_str), Some("b"));
}

#[test]
fn cache_serves_stale_until_invalidated() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_master(dir.path(), r#"{"svc": "first"}"#);

    let service = CredentialService::new(dir.path());
    assert_eq!(service.get("svc").as_deref(), Some("first"));

    // Rotate the secret on disk; the 60 s cache still returns the old one.
    write_master(dir.path(), r#"{"svc": "second"}"#);
    assert_eq!(service.get("svc").as_deref(), Some("first"));

    service.invalidate();
    assert_eq!(service.get("svc").as_deref(), Some("second"));
}

#[test]
fn misses_are_cached_too() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = CredentialService::new(dir.path());

    assert_eq!(service.get("late-arrival"), None);

    // The secret appears after the first lookup; cached miss persists.
    write_master(dir.path(), r#"{"late-arrival": "now-present"}"#);
    assert_eq!(service.get("late-arrival"), None);

    service.invalidate();
    assert_eq!(service.get("late-arrival").as_deref(), Some("now-present"));
}

#[test]
fn malformed_master_file_degrades_to_miss() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_master(dir.path(), "{not valid json");

    let service = CredentialService::new(dir.path());
    assert_eq!(service.get("anything"), None);
}
