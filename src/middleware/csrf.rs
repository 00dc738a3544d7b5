// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! CSRF protection for browser form posts.
//!
//! Two independent checks, both required:
//! - `require_same_origin` rejects cross-site requests using the `Origin`
//!   and `Sec-Fetch-Site` headers browsers attach.
//! - `CsrfForm` requires a signed double-submit token: the `csrf` cookie
//!   must match the `csrf_token` form field.
//!
//! Failures are a bare 403; which check failed is only logged.

use crate::config::Config;
use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{FromRequest, Request, State},
    http::{header, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    Form,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_COOKIE: &str = "csrf";

fn sign(nonce: &str, key: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(nonce.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// New token of the form `nonce.signature`.
pub fn issue_token(key: &[u8]) -> Result<String, AppError> {
    let nonce = URL_SAFE_NO_PAD.encode(crate::services::credentials::random_bytes::<16>()?);
    let signature = sign(&nonce, key)?;
    Ok(format!("{nonce}.{signature}"))
}

/// Whether `token` was issued with `key`.
pub fn token_is_valid(token: &str, key: &[u8]) -> bool {
    let Some((nonce, signature)) = token.split_once('.') else {
        return false;
    };
    match sign(nonce, key) {
        Ok(expected) => bool::from(expected.as_bytes().ct_eq(signature.as_bytes())),
        Err(_) => false,
    }
}

fn csrf_cookie(token: String, config: &Config) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(config.cookies_secure())
        .same_site(SameSite::Lax)
        .build()
}

/// Reuse the request's CSRF cookie if it is valid, otherwise issue one.
///
/// Returns the jar to send back and the token to embed in the form.
pub fn ensure_csrf_cookie(jar: CookieJar, config: &Config) -> Result<(CookieJar, String), AppError> {
    let existing = jar
        .get(CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|token| token_is_valid(token, &config.session_signing_key));

    match existing {
        Some(token) => Ok((jar, token)),
        None => {
            let token = issue_token(&config.session_signing_key)?;
            Ok((jar.add(csrf_cookie(token.clone(), config)), token))
        }
    }
}

#[derive(Deserialize)]
struct CsrfEnvelope<T> {
    #[serde(default)]
    csrf_token: String,
    #[serde(flatten)]
    inner: T,
}

/// Form body whose `csrf_token` field has been checked against the cookie.
#[derive(Debug, Clone)]
pub struct CsrfForm<T>(pub T);

impl<T> FromRequest<Arc<AppState>> for CsrfForm<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let cookie_token = CookieJar::from_headers(req.headers())
            .get(CSRF_COOKIE)
            .map(|c| c.value().to_string());

        let Form(envelope) = Form::<CsrfEnvelope<T>>::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;

        let valid = cookie_token.is_some_and(|cookie| {
            token_is_valid(&cookie, &state.config.session_signing_key)
                && bool::from(cookie.as_bytes().ct_eq(envelope.csrf_token.as_bytes()))
        });

        if !valid {
            tracing::warn!(check = "double_submit", "Blocked form post failing CSRF check");
            return Err(AppError::Forbidden.into_response());
        }

        Ok(CsrfForm(envelope.inner))
    }
}

/// Reject state-changing requests that a browser marks as cross-site.
///
/// Requests without either header (non-browser clients) pass here and are
/// still subject to the token check.
pub async fn require_same_origin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::OPTIONS
    ) {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let fetch_site = headers.get("sec-fetch-site").and_then(|v| v.to_str().ok());

    let allowed = match (origin, fetch_site) {
        (Some(origin), _) => origin.trim_end_matches('/') == state.config.public_origin(),
        (None, Some(site)) => matches!(site, "same-origin" | "none"),
        (None, None) => true,
    };

    if !allowed {
        tracing::warn!(
            check = "origin",
            origin = ?origin,
            sec_fetch_site = ?fetch_site,
            "Blocked cross-site form post"
        );
        return Err(AppError::Forbidden);
    }

    Ok(next.run(request).await)
}
