// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device authorization flow.
//!
//! An unattended client requests a code pair, shows the short user code to a
//! human, and polls with the long device code. The human confirms the user
//! code in a browser while logged in, which hands the client that user's
//! bearer token.
//!
//! ```text
//! request_code ──► Pending ──confirm──► Approved ──confirm──► AlreadyUsed
//!                     │                    │
//!                     └──── now >= expires_at ────► Expired
//! ```

use crate::config::Config;
use crate::db::Store;
use crate::error::AppError;
use crate::models::{ConfirmOutcome, ConfirmRejection, DeviceAuthorization, DeviceStatus};
use crate::services::{cleanup, credentials};
use serde::Serialize;

/// Attempts at drawing an unused code pair before giving up.
const MAX_CODE_ATTEMPTS: usize = 3;

/// Response to a device code request.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCodeGrant {
    pub device_code: String,
    pub user_code: String,
    pub expires_in: i64,
    pub interval: i64,
    pub verification_url: String,
}

/// What a poll found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Approved { token: String },
    Expired,
    InvalidCode,
}

/// Issue a new device code pair and store it as pending.
pub async fn request_code(
    store: &dyn Store,
    config: &Config,
    now: i64,
) -> Result<DeviceCodeGrant, AppError> {
    for _ in 0..MAX_CODE_ATTEMPTS {
        let record = DeviceAuthorization {
            device_code: credentials::generate_device_code()?,
            user_code: credentials::generate_user_code()?,
            expires_at: now + config.device_code_ttl_secs,
            user_id: None,
            api_token: None,
            created_at: now,
        };

        if store.insert_device_authorization(&record).await? {
            tracing::info!(user_code = %record.user_code, "Issued device code");

            let verification_url = format!(
                "{}/auth/device?code={}",
                config.base_url,
                urlencoding::encode(&record.user_code)
            );
            return Ok(DeviceCodeGrant {
                device_code: record.device_code,
                user_code: record.user_code,
                expires_in: config.device_code_ttl_secs,
                interval: config.device_poll_interval_secs,
                verification_url,
            });
        }

        tracing::warn!("Device code collision, drawing a new pair");
    }

    Err(AppError::Internal(anyhow::anyhow!(
        "could not allocate an unused device code after {MAX_CODE_ATTEMPTS} attempts"
    )))
}

/// Look up a device code and report where it stands.
///
/// Repeated polls of an approved code return the same token. With probability
/// `1 / cleanup_probability_denominator` the poll also sweeps expired data;
/// a failed sweep is logged and does not affect the poll.
pub async fn poll(
    store: &dyn Store,
    config: &Config,
    device_code: &str,
    now: i64,
) -> Result<PollOutcome, AppError> {
    if let Err(e) = cleanup::maybe_sweep(store, config.cleanup_probability_denominator, now).await
    {
        tracing::warn!(error = %e, "Inline cleanup failed");
    }

    if !credentials::is_device_code(device_code) {
        return Ok(PollOutcome::InvalidCode);
    }

    let Some(record) = store.get_device_authorization(device_code).await? else {
        return Ok(PollOutcome::InvalidCode);
    };

    Ok(match record.status(now) {
        DeviceStatus::Expired => PollOutcome::Expired,
        DeviceStatus::Pending => PollOutcome::Pending,
        DeviceStatus::Approved => match record.api_token {
            Some(token) => PollOutcome::Approved { token },
            None => PollOutcome::Pending,
        },
    })
}

/// Approve the device code a logged-in human typed.
///
/// Checks run in order: code present, code well formed, record exists, not expired, not
/// already approved. Rejections leave the store untouched.
pub async fn confirm(
    store: &dyn Store,
    raw_user_code: &str,
    user_id: u64,
    now: i64,
) -> Result<ConfirmOutcome, AppError> {
    let Some(user_code) = credentials::normalize_user_code(raw_user_code) else {
        return Ok(ConfirmOutcome::Rejected(ConfirmRejection::MissingCode));
    };
    if !credentials::is_user_code(&user_code) {
        return Ok(ConfirmOutcome::Rejected(ConfirmRejection::InvalidCode));
    }

    // Only used if the user has no token yet; the store decides atomically.
    let fresh_token = credentials::generate_api_token()?;

    let outcome = store
        .confirm_device_authorization(&user_code, user_id, &fresh_token, now)
        .await?;

    match &outcome {
        ConfirmOutcome::Approved { .. } => {
            tracing::info!(user_id, user_code = %user_code, "Device authorization approved");
        }
        ConfirmOutcome::Rejected(rejection) => {
            tracing::info!(
                user_id,
                user_code = %user_code,
                reason = rejection.message(),
                "Device authorization rejected"
            );
        }
    }

    Ok(outcome)
}
