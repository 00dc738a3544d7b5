// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store for tests and single-instance local development.
//!
//! Multi-record mutations (registration, token replacement, confirmation)
//! run under one write lock; counter increments rely on the per-key
//! atomicity of `DashMap::entry`.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{
    ConfirmOutcome, ConfirmRejection, CreateUserOutcome, DeviceAuthorization, NewUser,
    RateLimitRecord, User,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<u64, User>,
    device_authorizations: DashMap<String, DeviceAuthorization>,
    /// user code -> device code
    device_user_codes: DashMap<String, String>,
    rate_limits: DashMap<String, RateLimitRecord>,
    next_user_id: AtomicU64,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded data lives in the DashMaps, so a poisoned lock holds no
        // half-written state worth refusing over.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn find_user(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        self.users
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: u64) -> Result<Option<User>, AppError> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.find_user(|u| u.email == email))
    }

    async fn find_user_by_api_token(&self, token: &str) -> Result<Option<User>, AppError> {
        Ok(self.find_user(|u| u.api_token.as_deref() == Some(token)))
    }

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome, AppError> {
        let _guard = self.lock();

        if self.find_user(|u| u.email == user.email).is_some() {
            return Ok(CreateUserOutcome::EmailTaken);
        }
        if self
            .find_user(|u| u.username.as_deref() == Some(user.username.as_str()))
            .is_some()
        {
            return Ok(CreateUserOutcome::UsernameTaken);
        }

        let id = self.next_user_id.fetch_add(1, Ordering::Relaxed) + 1;
        let user = user.into_user(id);
        self.users.insert(id, user.clone());

        Ok(CreateUserOutcome::Created(user))
    }

    async fn set_user_visibility(
        &self,
        id: u64,
        is_public: bool,
    ) -> Result<Option<User>, AppError> {
        let _guard = self.lock();
        Ok(self.users.get_mut(&id).map(|mut user| {
            user.is_public = is_public;
            user.clone()
        }))
    }

    async fn replace_api_token(
        &self,
        id: u64,
        token: &str,
        issued_at: i64,
    ) -> Result<Option<User>, AppError> {
        let _guard = self.lock();
        Ok(self.users.get_mut(&id).map(|mut user| {
            user.api_token = Some(token.to_string());
            user.api_token_issued_at = Some(issued_at);
            user.clone()
        }))
    }

    async fn insert_device_authorization(
        &self,
        record: &DeviceAuthorization,
    ) -> Result<bool, AppError> {
        let _guard = self.lock();

        if self.device_authorizations.contains_key(&record.device_code)
            || self.device_user_codes.contains_key(&record.user_code)
        {
            return Ok(false);
        }

        self.device_user_codes
            .insert(record.user_code.clone(), record.device_code.clone());
        self.device_authorizations
            .insert(record.device_code.clone(), record.clone());

        Ok(true)
    }

    async fn get_device_authorization(
        &self,
        device_code: &str,
    ) -> Result<Option<DeviceAuthorization>, AppError> {
        Ok(self
            .device_authorizations
            .get(device_code)
            .map(|r| r.value().clone()))
    }

    async fn confirm_device_authorization(
        &self,
        user_code: &str,
        user_id: u64,
        fresh_token: &str,
        now: i64,
    ) -> Result<ConfirmOutcome, AppError> {
        let _guard = self.lock();

        let Some(device_code) = self.device_user_codes.get(user_code).map(|d| d.value().clone())
        else {
            return Ok(ConfirmOutcome::Rejected(ConfirmRejection::InvalidCode));
        };

        let Some(mut record) = self
            .device_authorizations
            .get(&device_code)
            .map(|r| r.value().clone())
        else {
            return Ok(ConfirmOutcome::Rejected(ConfirmRejection::InvalidCode));
        };

        if let Err(rejection) = record.confirmable(now) {
            return Ok(ConfirmOutcome::Rejected(rejection));
        }

        let token = {
            let mut user = self
                .users
                .get_mut(&user_id)
                .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

            match &user.api_token {
                Some(existing) => existing.clone(),
                None => {
                    user.api_token = Some(fresh_token.to_string());
                    user.api_token_issued_at = Some(now);
                    fresh_token.to_string()
                }
            }
        };

        record.approve(user_id, token.clone());
        self.device_authorizations.insert(device_code, record);

        Ok(ConfirmOutcome::Approved { token })
    }

    async fn hit_rate_limit(
        &self,
        key: &str,
        now: i64,
        window_secs: i64,
    ) -> Result<RateLimitRecord, AppError> {
        let mut entry = self
            .rate_limits
            .entry(key.to_string())
            .or_insert_with(|| RateLimitRecord {
                key: key.to_string(),
                window_start: now,
                window_end: now,
                count: 0,
            });

        let next = RateLimitRecord::hit(Some(entry.value().clone()), key, now, window_secs);
        *entry.value_mut() = next.clone();

        Ok(next)
    }

    async fn delete_expired_device_authorizations(
        &self,
        cutoff: i64,
    ) -> Result<usize, AppError> {
        let _guard = self.lock();

        let expired: Vec<DeviceAuthorization> = self
            .device_authorizations
            .iter()
            .filter(|r| r.expires_at < cutoff)
            .map(|r| r.value().clone())
            .collect();

        for record in &expired {
            self.device_authorizations.remove(&record.device_code);
            self.device_user_codes.remove(&record.user_code);
        }

        Ok(expired.len())
    }

    async fn delete_stale_rate_limits(&self, now: i64) -> Result<usize, AppError> {
        let mut removed = 0;
        self.rate_limits.retain(|_, record| {
            let keep = record.window_end > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
