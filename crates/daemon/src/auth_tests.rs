// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::TempDir;

fn auth(dir: &TempDir) -> Auth {
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let auth = Auth::new(store, "test-secret", 3600);
    auth.bootstrap_admin("admin", "hunter2").unwrap();
    auth
}

#[test]
fn password_hash_verifies_and_rejects() {
    let hash = Auth::hash_password("hunter2").unwrap();
    assert!(hash.starts_with("$argon2"));
    assert!(Auth::verify_password("hunter2", &hash));
    assert!(!Auth::verify_password("wrong", &hash));
}

#[test]
fn bootstrap_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let auth = auth(&dir);
    // Second call must not duplicate the user or change the password
    auth.bootstrap_admin("admin", "other-password").unwrap();
    assert!(auth.login("admin", "hunter2").is_ok());
    assert!(matches!(
        auth.login("admin", "other-password"),
        Err(AuthError::InvalidCredentials)
    ));
}

#[test]
fn login_then_authenticate_roundtrips() {
    let dir = TempDir::new().unwrap();
    let auth = auth(&dir);

    let (token, user) = auth.login("admin", "hunter2").unwrap();
    assert_eq!(user.username, "admin");
    assert_eq!(user.role, Role::Admin);

    let (authed, session) = auth.authenticate(&token).unwrap();
    assert_eq!(authed.id, user.id);
    assert_eq!(session.user_id, user.id);
}

#[test]
fn bad_credentials_are_rejected() {
    let dir = TempDir::new().unwrap();
    let auth = auth(&dir);
    assert!(matches!(
        auth.login("admin", "nope"),
        Err(AuthError::InvalidCredentials)
    ));
    assert!(matches!(
        auth.login("nobody", "hunter2"),
        Err(AuthError::InvalidCredentials)
    ));
}

#[test]
fn garbage_tokens_are_rejected() {
    let dir = TempDir::new().unwrap();
    let auth = auth(&dir);
    assert!(matches!(
        auth.authenticate("not-a-token"),
        Err(AuthError::InvalidToken)
    ));
}

#[test]
fn token_from_another_secret_is_rejected() {
    let dir = TempDir::new().unwrap();
    let auth = auth(&dir);
    let (token, _) = auth.login("admin", "hunter2").unwrap();

    let dir2 = TempDir::new().unwrap();
    let store2 = Arc::new(Store::open(dir2.path()).unwrap());
    let other = Auth::new(store2, "different-secret", 3600);
    assert!(matches!(
        other.authenticate(&token),
        Err(AuthError::InvalidToken)
    ));
}

#[test]
fn logout_revokes_the_session() {
    let dir = TempDir::new().unwrap();
    let auth = auth(&dir);
    let (token, _) = auth.login("admin", "hunter2").unwrap();

    auth.logout(&token).unwrap();
    assert!(matches!(
        auth.authenticate(&token),
        Err(AuthError::SessionExpired)
    ));
}
