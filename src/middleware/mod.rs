// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (authentication, CSRF, rate limiting, security).

pub mod auth;
pub mod csrf;
pub mod rate_limit;
pub mod security;
pub mod tasks_auth;

pub use auth::{require_bearer, ApiUser, MaybeSessionUser, SessionUser};
pub use csrf::{require_same_origin, CsrfForm};
pub use rate_limit::{enforce_rate_limit, LimitedRoute};
pub use tasks_auth::require_scheduler_auth;
