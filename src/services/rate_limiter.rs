// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fixed-window rate limiting backed by the shared store.
//!
//! Windows are fixed, not sliding, so a burst straddling a boundary can admit
//! up to twice the budget. Every check writes the counter; there is no path
//! that admits a request without counting it.

use crate::config::RateLimit;
use crate::db::Store;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_secs: i64 },
}

/// Count one request for `client_key` on `route` and decide whether to admit it.
///
/// Store failures are returned to the caller, which applies the fail-open or
/// fail-closed policy.
pub async fn check(
    store: &dyn Store,
    client_key: &str,
    route: &str,
    limit: RateLimit,
    now: i64,
) -> Result<RateLimitDecision, AppError> {
    let key = format!("{route}:{client_key}");
    let record = store.hit_rate_limit(&key, now, limit.window_secs).await?;

    if record.count > limit.max {
        Ok(RateLimitDecision::Limited {
            retry_after_secs: (record.window_end - now).max(1),
        })
    } else {
        Ok(RateLimitDecision::Allowed)
    }
}
