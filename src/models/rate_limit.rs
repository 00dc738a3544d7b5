// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fixed-window rate limit counters.

use serde::{Deserialize, Serialize};

/// Request counter for one (route, client) key over one window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub key: String,
    /// Unix seconds
    pub window_start: i64,
    /// Unix seconds; the record is void from this instant on
    pub window_end: i64,
    pub count: u32,
}

impl RateLimitRecord {
    pub fn is_current(&self, now: i64) -> bool {
        now >= self.window_start && now < self.window_end
    }

    /// The record after one more request at `now`.
    ///
    /// A missing or stale record starts a new window with a count of one;
    /// a current record is incremented.
    pub fn hit(existing: Option<Self>, key: &str, now: i64, window_secs: i64) -> Self {
        match existing {
            Some(mut record) if record.is_current(now) => {
                record.count = record.count.saturating_add(1);
                record
            }
            _ => Self {
                key: key.to_string(),
                window_start: now,
                window_end: now + window_secs,
                count: 1,
            },
        }
    }
}
