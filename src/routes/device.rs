// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device authorization endpoints.
//!
//! `/auth/device/code` and `/auth/device/token` are called by the unattended
//! client with JSON bodies. `/auth/device` and `/auth/device/confirm` are the
//! pages a logged-in human uses to approve the code.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::middleware::csrf::ensure_csrf_cookie;
use crate::middleware::{enforce_rate_limit, CsrfForm, LimitedRoute, SessionUser};
use crate::models::ConfirmOutcome;
use crate::services::credentials::normalize_user_code;
use crate::services::device_flow::{self, DeviceCodeGrant, PollOutcome};
use crate::time_utils::now_unix_secs;
use crate::views;
use crate::AppState;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// JSON endpoints used by the device itself.
pub fn client_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/auth/device/code",
            post(request_code).route_layer(middleware::from_fn_with_state(
                (state, LimitedRoute::DeviceCode),
                enforce_rate_limit,
            )),
        )
        .route("/auth/device/token", post(poll_token))
}

/// Pages for the human approving the device.
pub fn browser_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/device", get(confirm_form))
        .route("/auth/device/confirm", post(confirm))
}

// ─── Device Client ───────────────────────────────────────────

async fn request_code(State(state): State<Arc<AppState>>) -> Result<Json<DeviceCodeGrant>> {
    let grant =
        device_flow::request_code(state.store.as_ref(), &state.config, now_unix_secs()).await?;
    Ok(Json(grant))
}

#[derive(Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    device_code: String,
}

/// Body of a poll response. Exactly one of `status` / `error` is set.
#[derive(Serialize, Debug)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TokenResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TokenResponse {
    fn status(status: &'static str, token: Option<String>) -> Self {
        Self {
            status: Some(status.to_string()),
            token,
            error: None,
        }
    }

    fn error(error: &'static str) -> Self {
        Self {
            status: None,
            token: None,
            error: Some(error.to_string()),
        }
    }
}

async fn poll_token(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Response> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::info!(error = %rejection, "Unreadable device token request");
            let body = TokenResponse::error("invalid_request");
            return Ok((StatusCode::BAD_REQUEST, Json(body)).into_response());
        }
    };

    let outcome = if request.device_code.is_empty() {
        PollOutcome::InvalidCode
    } else {
        device_flow::poll(
            state.store.as_ref(),
            &state.config,
            &request.device_code,
            now_unix_secs(),
        )
        .await?
    };

    let (status, body) = match outcome {
        PollOutcome::Approved { token } => {
            (StatusCode::OK, TokenResponse::status("approved", Some(token)))
        }
        PollOutcome::Pending => (
            StatusCode::PRECONDITION_REQUIRED,
            TokenResponse::status("pending", None),
        ),
        PollOutcome::Expired => (StatusCode::BAD_REQUEST, TokenResponse::error("expired_token")),
        PollOutcome::InvalidCode => (
            StatusCode::BAD_REQUEST,
            TokenResponse::error("invalid_device_code"),
        ),
    };

    Ok((status, Json(body)).into_response())
}

// ─── Human Approval ──────────────────────────────────────────

#[derive(Deserialize)]
pub struct ConfirmParams {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Deserialize)]
pub struct ConfirmForm {
    #[serde(default)]
    user_code: String,
}

async fn confirm_form(
    State(state): State<Arc<AppState>>,
    SessionUser(user): SessionUser,
    jar: CookieJar,
    Query(params): Query<ConfirmParams>,
) -> Result<Response> {
    let code = params
        .code
        .as_deref()
        .and_then(normalize_user_code)
        .unwrap_or_default();

    let (jar, csrf_token) = ensure_csrf_cookie(jar, &state.config)?;
    Ok((jar, views::device_confirm_page(&csrf_token, &user, &code, None)).into_response())
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    SessionUser(user): SessionUser,
    jar: CookieJar,
    CsrfForm(form): CsrfForm<ConfirmForm>,
) -> Result<Response> {
    let outcome =
        device_flow::confirm(state.store.as_ref(), &form.user_code, user.id, now_unix_secs())
            .await?;

    match outcome {
        ConfirmOutcome::Approved { .. } => Ok(views::device_success_page().into_response()),
        ConfirmOutcome::Rejected(rejection) => {
            let (jar, csrf_token) = ensure_csrf_cookie(jar, &state.config)?;
            let page = views::device_confirm_page(
                &csrf_token,
                &user,
                &form.user_code,
                Some(rejection.message()),
            );
            Ok((StatusCode::BAD_REQUEST, jar, page).into_response())
        }
    }
}
