// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for programmatic clients.

use crate::error::{AppError, Result};
use crate::middleware::ApiUser;
use crate::models::User;
use crate::time_utils::format_unix_secs;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// API routes (require a bearer token).
/// The bearer middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/users/me", get(get_me).patch(update_me))
}

// ─── User Profile ────────────────────────────────────────────

/// Current user response.
#[derive(Serialize, Debug)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub id: u64,
    pub email: String,
    pub username: Option<String>,
    pub is_public: bool,
    pub api_token_issued_at: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            is_public: user.is_public,
            api_token_issued_at: user.api_token_issued_at.map(format_unix_secs),
            created_at: user.created_at,
        }
    }
}

async fn get_me(Extension(ApiUser(user)): Extension<ApiUser>) -> Json<UserResponse> {
    Json(user.into())
}

/// Profile fields a client may change.
#[derive(Deserialize, Debug)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub is_public: Option<bool>,
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(ApiUser(user)): Extension<ApiUser>,
    body: std::result::Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>> {
    let Json(update) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let Some(is_public) = update.is_public else {
        return Ok(Json(user.into()));
    };

    let updated = state
        .store
        .set_user_visibility(user.id, is_public)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.id)))?;

    tracing::info!(user_id = user.id, is_public, "Updated profile visibility");
    Ok(Json(updated.into()))
}
