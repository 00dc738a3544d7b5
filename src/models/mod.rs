// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod device;
pub mod rate_limit;
pub mod user;

pub use device::{ConfirmOutcome, ConfirmRejection, DeviceAuthorization, DeviceStatus};
pub use rate_limit::RateLimitRecord;
pub use user::{CreateUserOutcome, NewUser, User};
