// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use devicelink::config::Config;
use devicelink::db::{FirestoreDb, MemoryStore, Store};
use devicelink::routes::create_router;
use devicelink::services::SchedulerVerifier;
use devicelink::time_utils::now_unix_secs;
use devicelink::AppState;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_OIDC_KID: &str = "test-scheduler-key";
const TEST_OIDC_PRIVATE_KEY: &str = include_str!("../fixtures/scheduler_test_key.pem");
const TEST_OIDC_PUBLIC_KEY: &str = include_str!("../fixtures/scheduler_test_key.pub.pem");

pub const PASSWORD: &str = "correct horse battery";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app backed by an in-memory store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (Router, Arc<AppState>) {
    create_test_app_with(Config::test_default(), Arc::new(MemoryStore::new()))
}

#[allow(dead_code)]
pub fn create_test_app_with_config(config: Config) -> (Router, Arc<AppState>) {
    create_test_app_with(config, Arc::new(MemoryStore::new()))
}

pub fn create_test_app_with(config: Config, store: Arc<dyn Store>) -> (Router, Arc<AppState>) {
    let scheduler_verifier = SchedulerVerifier::new_with_static_key(
        &config,
        TEST_OIDC_KID,
        DecodingKey::from_rsa_pem(TEST_OIDC_PUBLIC_KEY.as_bytes()).unwrap(),
    )
    .unwrap();

    let state = Arc::new(AppState {
        config,
        store,
        scheduler_verifier,
    });

    (create_router(state.clone()), state)
}

/// Sign a Cloud Scheduler style OIDC token with the test key.
#[allow(dead_code)]
pub fn create_test_scheduler_jwt(config: &Config, email: &str) -> String {
    let now = now_unix_secs();
    let claims = json!({
        "iss": "https://accounts.google.com",
        "aud": format!("{}/tasks/cleanup", config.base_url),
        "sub": "1234567890",
        "email": email,
        "email_verified": true,
        "iat": now,
        "exp": now + 3600,
    });

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TEST_OIDC_KID.to_string());

    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(TEST_OIDC_PRIVATE_KEY.as_bytes()).unwrap(),
    )
    .unwrap()
}

// ─── Request Helpers ─────────────────────────────────────────

#[allow(dead_code)]
pub fn form_body(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[allow(dead_code)]
pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

#[allow(dead_code)]
pub fn set_cookie_headers(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

/// Value of cookie `name` set by `response`, if any.
#[allow(dead_code)]
pub fn cookie_value(response: &Response, name: &str) -> Option<String> {
    set_cookie_headers(response).iter().find_map(|cookie| {
        cookie
            .strip_prefix(&format!("{name}="))
            .map(|rest| rest.split(';').next().unwrap_or("").to_string())
    })
}

#[allow(dead_code)]
pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// Browser identity across requests: cookies plus the CSRF token.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct Browser {
    pub csrf: String,
    pub session: Option<String>,
}

#[allow(dead_code)]
impl Browser {
    /// Fetch the login page to pick up a CSRF cookie.
    pub async fn open(app: &Router) -> Self {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/auth/login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        Self {
            csrf: cookie_value(&response, "csrf").expect("login page sets csrf cookie"),
            session: None,
        }
    }

    pub fn cookie_header(&self) -> String {
        match &self.session {
            Some(session) => format!("csrf={}; session={}", self.csrf, session),
            None => format!("csrf={}", self.csrf),
        }
    }

    pub async fn get(&self, app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(header::COOKIE, self.cookie_header())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Same-origin form post with the CSRF token filled in.
    pub async fn post_form(&self, app: &Router, uri: &str, fields: &[(&str, &str)]) -> Response {
        let mut fields = fields.to_vec();
        fields.push(("csrf_token", self.csrf.as_str()));

        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header(header::ORIGIN, "http://localhost:8080")
                    .header(header::COOKIE, self.cookie_header())
                    .body(Body::from(form_body(&fields)))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Register a new account and keep its session.
    pub async fn register(&mut self, app: &Router, email: &str, username: &str) {
        let response = self
            .post_form(
                app,
                "/auth/register",
                &[("email", email), ("username", username), ("password", PASSWORD)],
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        self.session = Some(cookie_value(&response, "session").expect("session cookie"));
    }
}

#[allow(dead_code)]
pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}
