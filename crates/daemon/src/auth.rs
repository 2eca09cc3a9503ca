// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication: argon2 password hashes, JWT bearer tokens, persisted
//! sessions with expiry and revocation.
//!
//! A token carries the session id; validating a request checks both the
//! token signature/expiry and the session row, so revocation (logout)
//! takes effect immediately.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rd_core::{Clock, IdGen, Role, Session, SessionId, SystemClock, User, UserId, UuidIdGen};
use rd_storage::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("missing or malformed bearer token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("session expired or revoked")]
    SessionExpired,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// JWT claims: subject (user id), session id, expiry (unix seconds).
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    sid: String,
    exp: u64,
}

/// Authentication service over the store's user/session tables.
#[derive(Clone)]
pub struct Auth {
    store: Arc<Store>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_secs: u64,
}

impl Auth {
    pub fn new(store: Arc<Store>, secret: &str, expires_secs: u64) -> Self {
        Self {
            store,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expires_secs,
        }
    }

    pub fn hash_password(password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hash(e.to_string()))
    }

    fn verify_password(password: &str, hash: &str) -> bool {
        PasswordHash::new(hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Create the initial admin user when it does not exist yet.
    pub fn bootstrap_admin(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if self.store.find_user(username).is_some() {
            return Ok(());
        }
        let user = User {
            id: UserId::new(UuidIdGen.next()),
            username: username.to_string(),
            password_hash: Self::hash_password(password)?,
            role: Role::Admin,
            created_at_ms: SystemClock.epoch_ms(),
        };
        self.store.create_user(user)?;
        info!(username, "created initial admin user");
        Ok(())
    }

    /// Verify credentials, mint a session and a signed token.
    pub fn login(&self, username: &str, password: &str) -> Result<(String, User), AuthError> {
        let user = self
            .store
            .find_user(username)
            .ok_or(AuthError::InvalidCredentials)?;
        if !Self::verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        let now_ms = SystemClock.epoch_ms();
        let session = Session {
            id: SessionId::new(UuidIdGen.next()),
            user_id: user.id.clone(),
            expires_at_ms: now_ms + self.expires_secs * 1000,
            revoked: false,
        };
        self.store.create_session(session.clone())?;

        let claims = Claims {
            sub: user.id.as_str().to_string(),
            sid: session.id.as_str().to_string(),
            exp: now_ms / 1000 + self.expires_secs,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|_| AuthError::InvalidToken)?;
        Ok((token, user))
    }

    /// Validate a bearer token: signature, expiry, and the session row.
    pub fn authenticate(&self, token: &str) -> Result<(User, Session), AuthError> {
        let claims = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AuthError::InvalidToken)?
            .claims;

        let session = self
            .store
            .get_session(&claims.sid)
            .ok_or(AuthError::SessionExpired)?;
        if !session.is_valid(SystemClock.epoch_ms()) {
            return Err(AuthError::SessionExpired);
        }

        let user = self
            .store
            .get_user(&claims.sub)
            .ok_or(AuthError::InvalidToken)?;
        Ok((user, session))
    }

    /// Revoke the session behind a token.
    pub fn logout(&self, token: &str) -> Result<(), AuthError> {
        let (_, session) = self.authenticate(token)?;
        self.store.revoke_session(&session.id)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
