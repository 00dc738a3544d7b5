// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account settings page: view and regenerate the API token.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::Result;
use crate::middleware::csrf::ensure_csrf_cookie;
use crate::middleware::{CsrfForm, SessionUser};
use crate::services::accounts;
use crate::time_utils::now_unix_secs;
use crate::views;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/settings", get(show))
        .route("/settings/token", post(regenerate_token))
}

/// The regenerate button posts nothing but the CSRF token.
#[derive(Deserialize)]
pub struct RegenerateForm {}

async fn show(
    State(state): State<Arc<AppState>>,
    SessionUser(user): SessionUser,
    jar: CookieJar,
) -> Result<Response> {
    let (jar, csrf_token) = ensure_csrf_cookie(jar, &state.config)?;
    let page = views::settings_page(
        &csrf_token,
        &user,
        state.config.api_token_max_age_secs,
        now_unix_secs(),
        None,
    );
    Ok((jar, page).into_response())
}

async fn regenerate_token(
    State(state): State<Arc<AppState>>,
    SessionUser(user): SessionUser,
    jar: CookieJar,
    CsrfForm(_): CsrfForm<RegenerateForm>,
) -> Result<Response> {
    let now = now_unix_secs();
    let user = accounts::regenerate_token(state.store.as_ref(), user.id, now).await?;

    let (jar, csrf_token) = ensure_csrf_cookie(jar, &state.config)?;
    let page = views::settings_page(
        &csrf_token,
        &user,
        state.config.api_token_max_age_secs,
        now,
        Some("New API token generated. Update your linked devices."),
    );
    Ok((jar, page).into_response())
}
