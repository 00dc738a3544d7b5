// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device authorization flow tests.
//!
//! Drives the full request -> confirm -> poll sequence through the router
//! with an in-memory store.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use devicelink::db::Store;
use devicelink::models::DeviceAuthorization;
use devicelink::time_utils::now_unix_secs;
use serde_json::json;
use tower::ServiceExt;

mod common;
use common::{body_json, body_string, location, post_json, Browser};

async fn request_code(app: &axum::Router) -> serde_json::Value {
    let response = post_json(app, "/auth/device/code", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn poll(app: &axum::Router, device_code: &str) -> (StatusCode, serde_json::Value) {
    let response = post_json(app, "/auth/device/token", json!({ "device_code": device_code })).await;
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn test_device_flow_end_to_end() {
    let (app, state) = common::create_test_app();

    let grant = request_code(&app).await;
    let device_code = grant["device_code"].as_str().unwrap().to_string();
    let user_code = grant["user_code"].as_str().unwrap().to_string();

    assert_eq!(device_code.len(), 64);
    assert!(device_code.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(user_code.len(), 9);
    assert_eq!(&user_code[4..5], "-");
    assert_eq!(grant["expires_in"], 600);
    assert_eq!(grant["interval"], 5);
    assert_eq!(
        grant["verification_url"],
        format!("http://localhost:8080/auth/device?code={user_code}")
    );

    let (status, body) = poll(&app, &device_code).await;
    assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
    assert_eq!(body, json!({ "status": "pending" }));

    let mut browser = Browser::open(&app).await;
    browser.register(&app, "alice@example.com", "alice").await;

    // Lowercase, no dash: still the same code
    let typed = user_code.replace('-', "").to_lowercase();
    let response = browser
        .post_form(&app, "/auth/device/confirm", &[("user_code", typed.as_str())])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("Device linked"));

    let (status, body) = poll(&app, &device_code).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    let user = state
        .store
        .find_user_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["token"].as_str(), user.api_token.as_deref());

    // Polling again returns the same token
    let (status, again) = poll(&app, &device_code).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["token"], body["token"]);
}

#[tokio::test]
async fn test_confirm_twice_is_rejected() {
    let (app, _) = common::create_test_app();

    let grant = request_code(&app).await;
    let user_code = grant["user_code"].as_str().unwrap();

    let mut browser = Browser::open(&app).await;
    browser.register(&app, "bob@example.com", "bobby").await;

    let first = browser
        .post_form(&app, "/auth/device/confirm", &[("user_code", user_code)])
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = browser
        .post_form(&app, "/auth/device/confirm", &[("user_code", user_code)])
        .await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(second).await.contains("Code already used"));
}

#[tokio::test]
async fn test_second_user_cannot_rebind_code() {
    let (app, state) = common::create_test_app();

    let grant = request_code(&app).await;
    let device_code = grant["device_code"].as_str().unwrap();
    let user_code = grant["user_code"].as_str().unwrap();

    let mut first = Browser::open(&app).await;
    first.register(&app, "owner@example.com", "owner").await;
    let response = first
        .post_form(&app, "/auth/device/confirm", &[("user_code", user_code)])
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut second = Browser::open(&app).await;
    second.register(&app, "intruder@example.com", "intruder").await;
    let response = second
        .post_form(&app, "/auth/device/confirm", &[("user_code", user_code)])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("Code already used"));

    let owner = state
        .store
        .find_user_by_email("owner@example.com")
        .await
        .unwrap()
        .unwrap();
    let intruder = state
        .store
        .find_user_by_email("intruder@example.com")
        .await
        .unwrap()
        .unwrap();

    let (status, body) = poll(&app, device_code).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"].as_str(), owner.api_token.as_deref());
    assert_ne!(body["token"].as_str(), intruder.api_token.as_deref());

    let record = state
        .store
        .get_device_authorization(device_code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.user_id, Some(owner.id));
}

#[tokio::test]
async fn test_confirm_rejects_malformed_codes() {
    let (app, _) = common::create_test_app();

    let mut browser = Browser::open(&app).await;
    browser.register(&app, "mallory@example.com", "mallory").await;

    for code in ["ab/cd-efgh", "..", "__X__", "ABCD-EFG0", "ABCDE"] {
        let response = browser
            .post_form(&app, "/auth/device/confirm", &[("user_code", code)])
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{code}");
        assert!(body_string(response).await.contains("Invalid code"), "{code}");
    }
}

#[tokio::test]
async fn test_poll_rejects_malformed_device_codes() {
    let (app, _) = common::create_test_app();
    let long = "a".repeat(2000);

    for code in ["a/b", "..", "__x__", long.as_str()] {
        let (status, body) = poll(&app, code).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{code}");
        assert_eq!(body, json!({ "error": "invalid_device_code" }));
    }
}

#[tokio::test]
async fn test_poll_with_unreadable_body() {
    let (app, _) = common::create_test_app();

    let requests = [
        ("application/json", "{not json"),
        ("text/plain", r#"{"device_code":"x"}"#),
    ];
    for (content_type, body) in requests {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/device/token")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{content_type}");
        assert_eq!(
            body_json(response).await,
            json!({ "error": "invalid_request" })
        );
    }
}

#[tokio::test]
async fn test_confirm_rejections() {
    let (app, state) = common::create_test_app();

    let mut browser = Browser::open(&app).await;
    browser.register(&app, "carol@example.com", "carol").await;

    let response = browser
        .post_form(&app, "/auth/device/confirm", &[("user_code", "  ")])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("User code is required"));

    let response = browser
        .post_form(&app, "/auth/device/confirm", &[("user_code", "ZZZZ-ZZZZ")])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("Invalid code"));

    let now = now_unix_secs();
    let expired = DeviceAuthorization {
        device_code: "e".repeat(64),
        user_code: "EXPD-WXYZ".to_string(),
        expires_at: now - 1,
        user_id: None,
        api_token: None,
        created_at: now - 601,
    };
    assert!(state
        .store
        .insert_device_authorization(&expired)
        .await
        .unwrap());

    let response = browser
        .post_form(&app, "/auth/device/confirm", &[("user_code", "EXPD-WXYZ")])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("Code expired"));

    // The rejected record was not touched
    let record = state
        .store
        .get_device_authorization(&expired.device_code)
        .await
        .unwrap()
        .unwrap();
    assert!(record.api_token.is_none());

    let (status, body) = poll(&app, &expired.device_code).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "expired_token" }));
}

#[tokio::test]
async fn test_poll_unknown_or_missing_code() {
    let (app, _) = common::create_test_app();

    let (status, body) = poll(&app, "not-a-real-code").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "invalid_device_code" }));

    let response = post_json(&app, "/auth/device/token", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({ "error": "invalid_device_code" })
    );
}

#[tokio::test]
async fn test_confirm_page_requires_login() {
    let (app, _) = common::create_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/device?code=ABCD-EFGH")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        "/auth/login?next=%2Fauth%2Fdevice%3Fcode%3DABCD-EFGH"
    );
}

#[tokio::test]
async fn test_confirm_page_prefills_normalized_code() {
    let (app, _) = common::create_test_app();

    let mut browser = Browser::open(&app).await;
    browser.register(&app, "dave@example.com", "dave").await;

    let response = browser.get(&app, "/auth/device?code=abcd%20efgh").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );

    let page = body_string(response).await;
    assert!(page.contains(r#"value="ABCD-EFGH""#));
    assert!(page.contains("dave"));
}
