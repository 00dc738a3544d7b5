// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session and bearer authentication.
//!
//! Browser pages authenticate with a signed session cookie; programmatic
//! clients send `Authorization: Bearer <api token>`. The two never mix: the
//! cookie is ignored under `/api` and the bearer token is never accepted by a
//! page.

use crate::config::{Config, SESSION_MAX_AGE_SECS};
use crate::db::Store;
use crate::error::{AppError, BearerRejection};
use crate::models::User;
use crate::time_utils::now_unix_secs;
use crate::AppState;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SESSION_COOKIE: &str = "session";

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: usize,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
}

/// Create a signed session token for a user.
pub fn create_session_token(user_id: u64, signing_key: &[u8], now: i64) -> anyhow::Result<String> {
    let iat = usize::try_from(now)?;
    let claims = Claims {
        sub: user_id.to_string(),
        iat,
        exp: iat + SESSION_MAX_AGE_SECS as usize,
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )?)
}

/// Verify a session token and return the user ID it names.
pub fn decode_session_token(token: &str, signing_key: &[u8]) -> Option<u64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "iat", "sub"]);

    let data = decode::<Claims>(token, &DecodingKey::from_secret(signing_key), &validation).ok()?;
    data.claims.sub.parse().ok()
}

/// Session cookie carrying `token`.
pub fn session_cookie(token: String, config: &Config) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(config.cookies_secure())
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(SESSION_MAX_AGE_SECS))
        .build()
}

/// Cookie that clears the session, with the same attributes it was set with.
pub fn session_removal_cookie(config: &Config) -> Cookie<'static> {
    let mut cookie = session_cookie(String::new(), config);
    cookie.make_removal();
    cookie
}

/// Look up the user named by the request's session cookie.
///
/// `Ok(None)` covers every way the session can be absent or invalid; store
/// failures are errors so they never read as "logged out".
async fn session_user(headers: &HeaderMap, state: &AppState) -> Result<Option<User>, AppError> {
    let jar = CookieJar::from_headers(headers);
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(None);
    };

    let Some(user_id) = decode_session_token(cookie.value(), &state.config.session_signing_key)
    else {
        tracing::debug!("Ignoring session cookie with bad signature or claims");
        return Ok(None);
    };

    let user = state.store.get_user(user_id).await?;
    if user.is_none() {
        tracing::info!(user_id, "Session names an unknown user");
    }
    Ok(user)
}

/// Redirect to the login page, returning to `uri` afterwards.
pub fn login_redirect(uri: &Uri) -> Response {
    let next = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Redirect::to(&format!("/auth/login?next={}", urlencoding::encode(next))).into_response()
}

/// Logged-in user, required. Anonymous requests are redirected to log in.
#[derive(Debug, Clone)]
pub struct SessionUser(pub User);

impl FromRequestParts<Arc<AppState>> for SessionUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match session_user(&parts.headers, state).await {
            Ok(Some(user)) => Ok(SessionUser(user)),
            Ok(None) => Err(login_redirect(&parts.uri)),
            Err(e) => Err(e.into_response()),
        }
    }
}

/// Logged-in user if there is one; `None` for guests.
#[derive(Debug, Clone)]
pub struct MaybeSessionUser(pub Option<User>);

impl FromRequestParts<Arc<AppState>> for MaybeSessionUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        session_user(&parts.headers, state)
            .await
            .map(MaybeSessionUser)
            .map_err(IntoResponse::into_response)
    }
}

/// User resolved from a bearer token, attached to `/api` requests.
#[derive(Debug, Clone)]
pub struct ApiUser(pub User);

/// Resolve `Authorization: Bearer <token>` to a user.
pub async fn authenticate_bearer(
    store: &dyn Store,
    auth_header: Option<&HeaderValue>,
    now: i64,
    max_age_secs: i64,
) -> Result<User, AppError> {
    let header = auth_header.ok_or(AppError::Bearer(BearerRejection::MissingHeader))?;

    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.split_once(' '))
        .filter(|(scheme, token)| scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty())
        .map(|(_, token)| token.trim())
        .ok_or(AppError::Bearer(BearerRejection::InvalidFormat))?;

    let user = store
        .find_user_by_api_token(token)
        .await?
        .ok_or(AppError::Bearer(BearerRejection::InvalidToken))?;

    if !user.api_token_is_fresh(now, max_age_secs) {
        tracing::info!(user_id = user.id, "Rejected expired API token");
        return Err(AppError::Bearer(BearerRejection::TokenExpired));
    }

    Ok(user)
}

/// Middleware that requires a valid, unexpired bearer token.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate_bearer(
        state.store.as_ref(),
        request.headers().get(header::AUTHORIZATION),
        now_unix_secs(),
        state.config.api_token_max_age_secs,
    )
    .await
    .inspect_err(|e| {
        if let AppError::Bearer(rejection) = e {
            tracing::warn!(reason = rejection.reason(), "Bearer authentication failed");
        }
    })?;

    request.extensions_mut().insert(ApiUser(user));
    Ok(next.run(request).await)
}
