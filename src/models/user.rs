// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use serde::{Deserialize, Serialize};

/// User account stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Numeric user ID (also used as document ID)
    pub id: u64,
    /// Email address, trimmed and lowercased
    pub email: String,
    /// Lowercase username (None until chosen)
    pub username: Option<String>,
    /// Argon2id PHC string
    pub password_hash: String,
    /// Opaque API bearer token
    pub api_token: Option<String>,
    /// When `api_token` was issued (Unix seconds); always set alongside it
    pub api_token_issued_at: Option<i64>,
    /// Whether the user's scores are publicly visible
    #[serde(default)]
    pub is_public: bool,
    /// When the account was created (RFC 3339)
    pub created_at: String,
}

impl User {
    /// Whether the bearer token is still within its age limit at `now`.
    ///
    /// A token without an issuance time is treated as expired.
    pub fn api_token_is_fresh(&self, now: i64, max_age_secs: i64) -> bool {
        match self.api_token_issued_at {
            Some(issued_at) => now - issued_at <= max_age_secs,
            None => false,
        }
    }
}

/// Fields needed to create a user; the store assigns the ID.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub api_token: String,
    pub api_token_issued_at: i64,
    pub created_at: String,
}

impl NewUser {
    pub fn into_user(self, id: u64) -> User {
        User {
            id,
            email: self.email,
            username: Some(self.username),
            password_hash: self.password_hash,
            api_token: Some(self.api_token),
            api_token_issued_at: Some(self.api_token_issued_at),
            is_public: false,
            created_at: self.created_at,
        }
    }
}

/// Result of trying to create a user with unique email and username.
#[derive(Debug, Clone)]
pub enum CreateUserOutcome {
    Created(User),
    EmailTaken,
    UsernameTaken,
}
