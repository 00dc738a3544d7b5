// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task handler routes for Cloud Scheduler callbacks.
//!
//! These endpoints are called by Cloud Scheduler, not directly by users.
//! `require_scheduler_auth` is applied in routes/mod.rs.

use crate::error::Result;
use crate::services::cleanup::{self, SweepReport};
use crate::time_utils::now_unix_secs;
use crate::AppState;
use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;

/// Task handler routes (called by Cloud Scheduler).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/cleanup", post(run_cleanup))
}

/// Daily sweep of expired device authorizations and rate limit counters.
async fn run_cleanup(State(state): State<Arc<AppState>>) -> Result<Json<SweepReport>> {
    let report = cleanup::sweep(state.store.as_ref(), now_unix_secs()).await?;
    tracing::info!(removed = report.total(), "Scheduled cleanup complete");
    Ok(Json(report))
}
