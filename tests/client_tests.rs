// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Device login client against a live server on a loopback port.

use devicelink::client::{ClientError, Credentials, DeviceLoginClient, PollStatus};
use devicelink::config::Config;
use devicelink::db::{MemoryStore, Store};
use devicelink::models::{ConfirmOutcome, CreateUserOutcome, NewUser};
use devicelink::services::device_flow;
use devicelink::time_utils::now_unix_secs;
use devicelink::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod common;

/// Serve the app on an ephemeral port and return its base URL and state.
async fn spawn_server() -> (String, Arc<AppState>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let mut config = Config::test_default();
    config.base_url = base_url.clone();
    config.device_poll_interval_secs = 1;

    let (app, state) = common::create_test_app_with(config, Arc::new(MemoryStore::new()));
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (base_url, state)
}

async fn seed_user(store: &dyn Store) -> (u64, String) {
    let outcome = store
        .create_user(NewUser {
            email: "cli@example.com".to_string(),
            username: "cli".to_string(),
            password_hash: String::new(),
            api_token: "cli-token".to_string(),
            api_token_issued_at: now_unix_secs(),
            created_at: "2026-01-15T10:00:00Z".to_string(),
        })
        .await
        .unwrap();
    match outcome {
        CreateUserOutcome::Created(user) => (user.id, "cli-token".to_string()),
        other => panic!("seed user not created: {other:?}"),
    }
}

#[tokio::test]
async fn test_client_receives_token_after_approval() {
    let (base_url, state) = spawn_server().await;
    let (user_id, expected_token) = seed_user(state.store.as_ref()).await;

    let client = DeviceLoginClient::new(&base_url).unwrap();
    let code = client.request_code().await.unwrap();
    assert_eq!(code.interval, 1);
    assert!(code.verification_url.starts_with(&base_url));

    assert_eq!(
        client.poll_once(&code.device_code).await.unwrap(),
        PollStatus::Pending
    );

    let approve_store = state.clone();
    let user_code = code.user_code.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let outcome = device_flow::confirm(
            approve_store.store.as_ref(),
            &user_code,
            user_id,
            now_unix_secs(),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Approved { .. }));
    });

    let token = client
        .wait_for_token(&code, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(token, expected_token);
}

#[tokio::test]
async fn test_client_unknown_code() {
    let (base_url, _) = spawn_server().await;
    let client = DeviceLoginClient::new(&base_url).unwrap();

    let result = client.poll_once("not-a-device-code").await;
    assert!(matches!(result, Err(ClientError::InvalidCode)));
}

#[tokio::test]
async fn test_client_gives_up_at_deadline() {
    let (base_url, _) = spawn_server().await;
    let client = DeviceLoginClient::new(&base_url).unwrap();

    let code = client.request_code().await.unwrap();
    let result = client.wait_for_token(&code, Duration::from_secs(2)).await;
    assert!(matches!(result, Err(ClientError::TimedOut)));
}

#[tokio::test]
async fn test_saved_credentials_authenticate_later_calls() {
    let (base_url, state) = spawn_server().await;
    let (user_id, token) = seed_user(state.store.as_ref()).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devicelink").join("credentials");
    Credentials::new(&base_url, &token).save_to(&path).unwrap();

    let saved = Credentials::load_from(&path).unwrap().unwrap();
    assert_eq!(saved.endpoint, base_url);

    let client = DeviceLoginClient::new(&saved.endpoint).unwrap();
    let profile = client.fetch_profile(&saved.token).await.unwrap();
    assert_eq!(profile.id, user_id);
    assert_eq!(profile.email, "cli@example.com");
    assert_eq!(profile.username.as_deref(), Some("cli"));

    let result = client.fetch_profile("revoked-token").await;
    assert!(matches!(result, Err(ClientError::Unauthorized(reason)) if reason == "invalid_token"));
}
