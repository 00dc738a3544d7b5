// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rate limiting on the login, registration and device code endpoints.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use devicelink::config::{Config, RateLimit};
use devicelink::db::FirestoreDb;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

mod common;
use common::{body_json, form_body};

fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::new(ip.parse().unwrap(), 40000))
}

async fn request_code(app: &Router, from: &str, forwarded_for: Option<&str>) -> Response {
    let mut request = Request::builder()
        .method("POST")
        .uri("/auth/device/code")
        .extension(peer(from));
    if let Some(value) = forwarded_for {
        request = request.header("x-forwarded-for", value);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn request_code_from(app: &Router, client: &str) -> Response {
    request_code(app, client, None).await
}

#[tokio::test]
async fn test_exactly_max_requests_admitted() {
    let mut config = Config::test_default();
    config.rate_limits.device_code = RateLimit::new(3, 600);
    let (app, _) = common::create_test_app_with_config(config);

    for _ in 0..3 {
        let response = request_code_from(&app, "198.51.100.4").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = request_code_from(&app, "198.51.100.4").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: i64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=600).contains(&retry_after));
    assert_eq!(body_json(response).await["error"], "rate_limited");

    // A different client has its own budget
    let response = request_code_from(&app, "198.51.100.5").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_for_ignored_without_trusted_proxy() {
    let mut config = Config::test_default();
    config.rate_limits.device_code = RateLimit::new(3, 600);
    let (app, _) = common::create_test_app_with_config(config);

    // One peer rotating the header still shares a single budget
    let mut admitted = 0;
    for i in 0..10 {
        let spoofed = format!("192.0.2.{i}");
        let response = request_code(&app, "203.0.113.9", Some(&spoofed)).await;
        if response.status() == StatusCode::OK {
            admitted += 1;
        } else {
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
    }
    assert_eq!(admitted, 3);
}

#[tokio::test]
async fn test_trusted_proxy_entry_is_the_client() {
    let mut config = Config::test_default();
    config.rate_limits.device_code = RateLimit::new(2, 600);
    config.trusted_proxy_hops = 1;
    let (app, _) = common::create_test_app_with_config(config);

    // The front end appends the real address after whatever the client sent
    for i in 0..2 {
        let header = format!("192.0.2.{i}, 198.51.100.20");
        let response = request_code(&app, "10.0.0.1", Some(&header)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = request_code(&app, "10.0.0.1", Some("192.0.2.99, 198.51.100.20")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Another real client behind the same proxy has its own budget
    let response = request_code(&app, "10.0.0.1", Some("198.51.100.21")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_routes_have_separate_budgets() {
    let mut config = Config::test_default();
    config.rate_limits.device_code = RateLimit::new(1, 600);
    let (app, _) = common::create_test_app_with_config(config);

    assert_eq!(
        request_code_from(&app, "198.51.100.6").await.status(),
        StatusCode::OK
    );
    assert_eq!(
        request_code_from(&app, "198.51.100.6").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    // Login from the same client is still admitted (and fails the CSRF check)
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .extension(peer("198.51.100.6"))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form_body(&[("email", "a@example.com")])))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unlimited_routes_not_counted() {
    let mut config = Config::test_default();
    config.rate_limits.device_code = RateLimit::new(1, 600);
    let (app, _) = common::create_test_app_with_config(config);

    for _ in 0..5 {
        let response = common::post_json(
            &app,
            "/auth/device/token",
            serde_json::json!({ "device_code": "unknown" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

fn login_attempt() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form_body(&[("email", "a@example.com")])))
        .unwrap()
}

#[tokio::test]
async fn test_store_failure_fails_closed_by_default() {
    let config = Config::test_default();
    let (app, _) = common::create_test_app_with(config, Arc::new(FirestoreDb::new_offline()));

    let response = app.oneshot(login_attempt()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_store_failure_fails_open_when_configured() {
    let mut config = Config::test_default();
    config.rate_limit_fail_open = true;
    let (app, _) = common::create_test_app_with(config, Arc::new(FirestoreDb::new_offline()));

    // Admitted past the limiter; rejected by the handler's CSRF check
    let response = app.oneshot(login_attempt()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
