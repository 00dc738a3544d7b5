// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod api;
pub mod auth;
pub mod device;
pub mod settings;
pub mod tasks;

use crate::middleware::{require_bearer, require_same_origin, require_scheduler_auth};
use crate::AppState;
use axum::http::{header, Method};
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct HealthResponse {
    pub status: String,
    pub build_id: String,
}

/// Health check response
async fn health_check() -> Json<HealthResponse> {
    let build_id = option_env!("BUILD_ID").unwrap_or("unknown").to_string();
    Json(HealthResponse {
        status: "ok".to_string(),
        build_id,
    })
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Bearer-token clients carry no ambient credentials, so any origin may
    // call them; cookies are never sent cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    // Browser pages: session cookie + CSRF protection
    let browser_routes = Router::new()
        .merge(auth::routes(state.clone()))
        .merge(device::browser_routes())
        .merge(settings::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_same_origin,
        ));

    // Programmatic clients: JSON, no cookies
    let client_routes = Router::new()
        .merge(device::client_routes(state.clone()))
        .merge(
            api::routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer)),
        )
        .layer(cors);

    // Task handler (called by Cloud Scheduler)
    let task_routes = tasks::routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        require_scheduler_auth,
    ));

    Router::new()
        .route("/health", get(health_check))
        .merge(browser_routes)
        .merge(client_routes)
        .merge(task_routes)
        .layer(middleware::from_fn(
            crate::middleware::security::add_security_headers,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
