// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device authorization records.
//!
//! A record's status is never stored. It is derived on every read from the
//! expiry time and whether a token has been granted, so there is nothing that
//! can drift out of sync.

use serde::{Deserialize, Serialize};

/// One device-linking attempt, stored keyed by `device_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    /// Long secret held by the unattended client
    pub device_code: String,
    /// Short code typed by the human, normalized as `XXXX-XXXX`
    pub user_code: String,
    /// Unix seconds after which the record is expired
    pub expires_at: i64,
    /// User who confirmed the code
    pub user_id: Option<u64>,
    /// Bearer token granted on confirmation
    pub api_token: Option<String>,
    /// Unix seconds
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Pending,
    Approved,
    Expired,
}

impl DeviceAuthorization {
    pub fn status(&self, now: i64) -> DeviceStatus {
        if now >= self.expires_at {
            DeviceStatus::Expired
        } else if self.api_token.is_some() {
            DeviceStatus::Approved
        } else {
            DeviceStatus::Pending
        }
    }

    /// Check whether a human may confirm this record at `now`.
    pub fn confirmable(&self, now: i64) -> Result<(), ConfirmRejection> {
        match self.status(now) {
            DeviceStatus::Pending => Ok(()),
            DeviceStatus::Expired => Err(ConfirmRejection::Expired),
            DeviceStatus::Approved => Err(ConfirmRejection::AlreadyUsed),
        }
    }

    /// Bind the record to a user and the token they granted.
    pub fn approve(&mut self, user_id: u64, token: String) {
        self.user_id = Some(user_id);
        self.api_token = Some(token);
    }
}

/// Outcome of a confirmation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Approved { token: String },
    Rejected(ConfirmRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmRejection {
    MissingCode,
    InvalidCode,
    Expired,
    AlreadyUsed,
}

impl ConfirmRejection {
    /// Message shown on the confirmation page.
    pub fn message(self) -> &'static str {
        match self {
            ConfirmRejection::MissingCode => "User code is required",
            ConfirmRejection::InvalidCode => "Invalid code",
            ConfirmRejection::Expired => "Code expired",
            ConfirmRejection::AlreadyUsed => "Code already used",
        }
    }
}
