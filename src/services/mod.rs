// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod accounts;
pub mod cleanup;
pub mod credentials;
pub mod device_flow;
pub mod rate_limiter;
pub mod scheduler_oidc;

pub use accounts::{FieldError, LoginOutcome, Registration, RegistrationOutcome};
pub use cleanup::SweepReport;
pub use device_flow::{DeviceCodeGrant, PollOutcome};
pub use rate_limiter::RateLimitDecision;
pub use scheduler_oidc::{OidcError, SchedulerPrincipal, SchedulerVerifier};
