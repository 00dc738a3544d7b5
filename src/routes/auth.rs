// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login, registration and logout pages.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::auth::{create_session_token, session_cookie, session_removal_cookie};
use crate::middleware::csrf::ensure_csrf_cookie;
use crate::middleware::{enforce_rate_limit, CsrfForm, LimitedRoute, MaybeSessionUser};
use crate::models::User;
use crate::services::accounts::{self, LoginOutcome, Registration, RegistrationOutcome};
use crate::time_utils::now_unix_secs;
use crate::views;
use crate::AppState;

/// Where to land after logging in when no `next` was given.
const DEFAULT_LANDING: &str = "/settings";

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let limited = |route: LimitedRoute| {
        middleware::from_fn_with_state((state.clone(), route), enforce_rate_limit)
    };

    Router::new()
        .route(
            "/auth/login",
            get(login_form).merge(post(login).route_layer(limited(LimitedRoute::Login))),
        )
        .route(
            "/auth/register",
            get(register_form).merge(post(register).route_layer(limited(LimitedRoute::Register))),
        )
        .route("/auth/logout", post(logout))
}

/// Only local absolute paths are followed, never `//host` or `/\host`.
/// Anything that would not survive as a `Location` header is dropped too.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.starts_with("/\\")
                && path.bytes().all(|b| b.is_ascii_graphic()) =>
        {
            path
        }
        _ => DEFAULT_LANDING,
    }
}

#[derive(Deserialize)]
pub struct NextParams {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    next: Option<String>,
}

/// Set the session cookie and send the browser on its way.
fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: &User,
    next: Option<&str>,
) -> Result<Response> {
    let token = create_session_token(user.id, &state.config.session_signing_key, now_unix_secs())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session token creation failed: {e}")))?;

    let jar = jar.add(session_cookie(token, &state.config));
    Ok((jar, Redirect::to(safe_next(next))).into_response())
}

async fn login_form(
    State(state): State<Arc<AppState>>,
    MaybeSessionUser(user): MaybeSessionUser,
    jar: CookieJar,
    Query(params): Query<NextParams>,
) -> Result<Response> {
    if user.is_some() {
        return Ok(Redirect::to(safe_next(params.next.as_deref())).into_response());
    }

    let (jar, csrf_token) = ensure_csrf_cookie(jar, &state.config)?;
    let page = views::login_page(&csrf_token, "", params.next.as_deref(), None);
    Ok((jar, page).into_response())
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    CsrfForm(form): CsrfForm<LoginForm>,
) -> Result<Response> {
    match accounts::login(state.store.as_ref(), &form.email, &form.password).await? {
        LoginOutcome::Success(user) => start_session(&state, jar, &user, form.next.as_deref()),
        LoginOutcome::InvalidCredentials => {
            let (jar, csrf_token) = ensure_csrf_cookie(jar, &state.config)?;
            let page = views::login_page(
                &csrf_token,
                &form.email,
                form.next.as_deref(),
                Some("Invalid email or password"),
            );
            Ok((StatusCode::UNAUTHORIZED, jar, page).into_response())
        }
    }
}

async fn register_form(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<NextParams>,
) -> Result<Response> {
    let (jar, csrf_token) = ensure_csrf_cookie(jar, &state.config)?;
    let page = views::register_page(&csrf_token, "", "", params.next.as_deref(), None);
    Ok((jar, page).into_response())
}

async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    CsrfForm(form): CsrfForm<RegisterForm>,
) -> Result<Response> {
    let registration = Registration::normalized(&form.email, &form.username, &form.password);

    match accounts::register(state.store.as_ref(), registration, now_unix_secs()).await? {
        RegistrationOutcome::Registered(user) => {
            start_session(&state, jar, &user, form.next.as_deref())
        }
        RegistrationOutcome::Rejected(error) => {
            tracing::info!(field = error.field, "Registration rejected");
            let (jar, csrf_token) = ensure_csrf_cookie(jar, &state.config)?;
            let page = views::register_page(
                &csrf_token,
                &form.email,
                &form.username,
                form.next.as_deref(),
                Some(&error.message),
            );
            Ok((StatusCode::BAD_REQUEST, jar, page).into_response())
        }
    }
}

/// Clear the session cookie. Sessions are stateless, so there is nothing to
/// revoke server-side.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let jar = jar.add(session_removal_cookie(&state.config));
    (jar, Redirect::to("/auth/login"))
}
