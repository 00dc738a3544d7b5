// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cloud Scheduler authentication middleware.

use crate::services::scheduler_oidc::OidcError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Require a valid Cloud Scheduler OIDC token for `/tasks/*` routes.
pub async fn require_scheduler_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let principal = state
        .scheduler_verifier
        .verify(request.headers().get(header::AUTHORIZATION))
        .await
        .map_err(|err| match err {
            OidcError::Forbidden(reason) => {
                tracing::warn!(reason = %reason, "Blocked tasks request: invalid OIDC token");
                StatusCode::FORBIDDEN
            }
            OidcError::Transient(reason) => {
                tracing::error!(reason = %reason, "Tasks OIDC verification transient failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    tracing::debug!(
        email = %principal.email,
        subject = %principal.subject,
        "Scheduler OIDC verification succeeded"
    );

    Ok(next.run(request).await)
}
