// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! Every request re-reads what it needs from the store; nothing here caches
//! records across requests. Operations that must be atomic (registration,
//! confirmation, counter increments) are single trait methods so each backend
//! can implement them as one conditional write.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{ConfirmOutcome, CreateUserOutcome, DeviceAuthorization, NewUser, RateLimitRecord, User};
use async_trait::async_trait;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Unique index: email -> user id
    pub const USER_EMAILS: &str = "user_emails";
    /// Unique index: username -> user id
    pub const USERNAMES: &str = "usernames";
    pub const DEVICE_AUTHORIZATIONS: &str = "device_authorizations";
    /// Unique index: user code -> device code
    pub const DEVICE_USER_CODES: &str = "device_user_codes";
    pub const RATE_LIMITS: &str = "rate_limits";
}

/// Persistent storage used by the auth handlers.
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Users ───────────────────────────────────────────────────

    async fn get_user(&self, id: u64) -> Result<Option<User>, AppError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_api_token(&self, token: &str) -> Result<Option<User>, AppError>;

    /// Create a user, enforcing email and username uniqueness atomically.
    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome, AppError>;

    /// Set the public-visibility flag. Returns the updated user.
    async fn set_user_visibility(&self, id: u64, is_public: bool)
        -> Result<Option<User>, AppError>;

    /// Replace the user's bearer token, invalidating the previous one.
    async fn replace_api_token(
        &self,
        id: u64,
        token: &str,
        issued_at: i64,
    ) -> Result<Option<User>, AppError>;

    // ─── Device Authorizations ───────────────────────────────────

    /// Insert a new pending record. Returns `false` without writing if the
    /// device code or user code is already in use.
    async fn insert_device_authorization(
        &self,
        record: &DeviceAuthorization,
    ) -> Result<bool, AppError>;

    async fn get_device_authorization(
        &self,
        device_code: &str,
    ) -> Result<Option<DeviceAuthorization>, AppError>;

    /// Approve the pending record with `user_code` for `user_id`.
    ///
    /// Atomic with respect to concurrent confirmations: at most one caller
    /// sees `Approved`. If the user has no bearer token, `fresh_token` is
    /// stored as theirs (issued at `now`) only if it is still absent; the
    /// record always receives the token the user ends up holding.
    async fn confirm_device_authorization(
        &self,
        user_code: &str,
        user_id: u64,
        fresh_token: &str,
        now: i64,
    ) -> Result<ConfirmOutcome, AppError>;

    // ─── Rate Limits ─────────────────────────────────────────────

    /// Atomically count one request for `key` and return the updated record.
    async fn hit_rate_limit(
        &self,
        key: &str,
        now: i64,
        window_secs: i64,
    ) -> Result<RateLimitRecord, AppError>;

    // ─── Cleanup ─────────────────────────────────────────────────

    /// Delete device authorizations that expired before `cutoff`.
    async fn delete_expired_device_authorizations(&self, cutoff: i64)
        -> Result<usize, AppError>;

    /// Delete rate limit records whose window ended at or before `now`.
    async fn delete_stale_rate_limits(&self, now: i64) -> Result<usize, AppError>;
}
