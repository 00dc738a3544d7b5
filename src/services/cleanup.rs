// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Eviction of expired device authorizations and stale rate limit counters.
//!
//! Expiry is computed on every read, so nothing here is needed for
//! correctness; it only keeps the collections from growing without bound.

use crate::config::DEVICE_CODE_GRACE_SECS;
use crate::db::Store;
use crate::error::AppError;
use crate::services::credentials;
use serde::Serialize;

/// Counts of what one sweep deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub device_authorizations: usize,
    pub rate_limits: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.device_authorizations + self.rate_limits
    }
}

/// Delete device authorizations more than the grace period past expiry and
/// rate limit records whose window has ended.
pub async fn sweep(store: &dyn Store, now: i64) -> Result<SweepReport, AppError> {
    let device_authorizations = store
        .delete_expired_device_authorizations(now - DEVICE_CODE_GRACE_SECS)
        .await?;
    let rate_limits = store.delete_stale_rate_limits(now).await?;

    let report = SweepReport {
        device_authorizations,
        rate_limits,
    };
    tracing::info!(
        device_authorizations,
        rate_limits,
        "Cleanup sweep finished"
    );
    Ok(report)
}

/// Run `sweep` with probability `1 / denominator`. A denominator of 0 never
/// sweeps; 1 always does.
pub async fn maybe_sweep(
    store: &dyn Store,
    denominator: u32,
    now: i64,
) -> Result<Option<SweepReport>, AppError> {
    if denominator == 0 || credentials::random_below(denominator)? != 0 {
        return Ok(None);
    }
    tracing::debug!("Running inline cleanup");
    sweep(store, now).await.map(Some)
}
