// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API authentication and CORS tests.
//!
//! These tests verify that:
//! 1. `/api` rejects missing, malformed, unknown and expired bearer tokens
//! 2. A valid token reaches the handler, and the session cookie does not
//! 3. CORS preflight requests return correct headers

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use devicelink::db::Store;
use devicelink::models::{CreateUserOutcome, NewUser};
use devicelink::time_utils::now_unix_secs;
use serde_json::json;
use tower::ServiceExt;

mod common;
use common::{body_json, Browser};

async fn get_me(app: &Router, authorization: Option<&str>) -> Response {
    let mut request = Request::builder().uri("/api/users/me");
    if let Some(value) = authorization {
        request = request.header(header::AUTHORIZATION, value);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn seed_user(store: &dyn Store, token: &str, issued_at: i64) -> u64 {
    let outcome = store
        .create_user(NewUser {
            email: "api@example.com".to_string(),
            username: "apiuser".to_string(),
            password_hash: String::new(),
            api_token: token.to_string(),
            api_token_issued_at: issued_at,
            created_at: "2026-01-15T10:00:00Z".to_string(),
        })
        .await
        .unwrap();
    match outcome {
        CreateUserOutcome::Created(user) => user.id,
        other => panic!("seed user not created: {other:?}"),
    }
}

#[tokio::test]
async fn test_rejection_reasons() {
    let (app, state) = common::create_test_app();
    let max_age = state.config.api_token_max_age_secs;
    seed_user(state.store.as_ref(), "stale-token", now_unix_secs() - max_age - 60).await;

    let cases = [
        (None, "missing_header"),
        (Some("stale-token"), "invalid_format"),
        (Some("Basic dXNlcjpwYXNz"), "invalid_format"),
        (Some("Bearer no-such-token"), "invalid_token"),
        (Some("Bearer stale-token"), "token_expired"),
    ];

    for (authorization, reason) in cases {
        let response = get_me(&app, authorization).await;
        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "authorization {authorization:?}"
        );
        let body = body_json(response).await;
        assert_eq!(body["error"], reason);
        assert_eq!(body["message"], "Authentication failed");
    }
}

#[tokio::test]
async fn test_valid_token_returns_profile() {
    let (app, state) = common::create_test_app();
    let user_id = seed_user(state.store.as_ref(), "good-token", now_unix_secs()).await;

    let response = get_me(&app, Some("Bearer good-token")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["id"], user_id);
    assert_eq!(body["email"], "api@example.com");
    assert_eq!(body["username"], "apiuser");
    assert_eq!(body["is_public"], false);
    assert!(body.get("password_hash").is_none());
    assert!(body.get("api_token").is_none());
}

#[tokio::test]
async fn test_session_cookie_not_accepted_for_api() {
    let (app, _) = common::create_test_app();

    let mut browser = Browser::open(&app).await;
    browser.register(&app, "erin@example.com", "erin").await;

    let response = browser.get(&app, "/api/users/me").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "missing_header");
}

#[tokio::test]
async fn test_patch_visibility() {
    let (app, state) = common::create_test_app();
    let user_id = seed_user(state.store.as_ref(), "good-token", now_unix_secs()).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/users/me")
                .header(header::AUTHORIZATION, "Bearer good-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "is_public": true }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["is_public"], true);

    let stored = state.store.get_user(user_id).await.unwrap().unwrap();
    assert!(stored.is_public);

    // An empty patch changes nothing
    let response = app
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/users/me")
                .header(header::AUTHORIZATION, "Bearer good-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["is_public"], true);
}

#[tokio::test]
async fn test_patch_with_unreadable_body() {
    let (app, state) = common::create_test_app();
    seed_user(state.store.as_ref(), "good-token", now_unix_secs()).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/users/me")
                .header(header::AUTHORIZATION, "Bearer good-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"is_public\": maybe"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "bad_request");
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _) = common::create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/users/me")
                .header(header::ORIGIN, "https://tool.example.org")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    let methods = response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_METHODS)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(methods.contains("PATCH"));
}
