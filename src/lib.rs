// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Devicelink: accounts, sessions and device linking for a score tracker
//!
//! This crate provides the authentication backend: browser sessions, API
//! bearer tokens, and a device authorization flow that lets a headless
//! client obtain a bearer token after a human approves it in a browser.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;
pub mod views;

use config::Config;
use db::Store;
use services::SchedulerVerifier;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub scheduler_verifier: SchedulerVerifier,
}
