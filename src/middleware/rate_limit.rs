// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-route rate limiting middleware.

use crate::config::RateLimit;
use crate::error::AppError;
use crate::services::rate_limiter::{self, RateLimitDecision};
use crate::time_utils::now_unix_secs;
use crate::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Routes with their own request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitedRoute {
    Login,
    Register,
    DeviceCode,
}

impl LimitedRoute {
    pub fn name(self) -> &'static str {
        match self {
            LimitedRoute::Login => "login",
            LimitedRoute::Register => "register",
            LimitedRoute::DeviceCode => "device_code",
        }
    }

    fn limit(self, state: &AppState) -> RateLimit {
        let limits = &state.config.rate_limits;
        match self {
            LimitedRoute::Login => limits.login,
            LimitedRoute::Register => limits.register,
            LimitedRoute::DeviceCode => limits.device_code,
        }
    }
}

/// Identify the client.
///
/// Each trusted proxy appends the address it saw to `X-Forwarded-For`, so the
/// entry `trusted_hops` from the right is the one the outermost proxy wrote.
/// Anything left of it came from the client and is ignored. With no trusted
/// proxies, or a header too short to hold that entry, the peer address is used.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_hops: usize) -> String {
    let forwarded = match trusted_hops {
        0 => None,
        hops => headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .nth(hops - 1)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
    };

    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Count the request against its route budget; reject with 429 when over.
pub async fn enforce_rate_limit(
    State((state, route)): State<(Arc<AppState>, LimitedRoute)>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer, state.config.trusted_proxy_hops);

    let decision = rate_limiter::check(
        state.store.as_ref(),
        &client,
        route.name(),
        route.limit(&state),
        now_unix_secs(),
    )
    .await;

    match decision {
        Ok(RateLimitDecision::Allowed) => Ok(next.run(request).await),
        Ok(RateLimitDecision::Limited { retry_after_secs }) => {
            tracing::warn!(route = route.name(), client_key = %client, "Rate limit exceeded");
            Err(AppError::RateLimited { retry_after_secs })
        }
        Err(e) if state.config.rate_limit_fail_open => {
            tracing::error!(
                error = %e,
                route = route.name(),
                "Rate limit store unavailable, admitting request"
            );
            Ok(next.run(request).await)
        }
        Err(e) => Err(e),
    }
}
