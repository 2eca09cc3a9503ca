// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User accounts and authentication sessions.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a user account.
    pub struct UserId;
}

crate::define_id! {
    /// Unique identifier for an authentication session.
    pub struct SessionId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// A user account. The password is stored as an argon2 hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at_ms: u64,
}

/// An authentication session. Mutating API calls require one that is
/// neither expired nor revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub expires_at_ms: u64,
    #[serde(default)]
    pub revoked: bool,
}

impl Session {
    pub fn is_valid(&self, now_ms: u64) -> bool {
        !self.revoked && now_ms < self.expires_at_ms
    }
}
