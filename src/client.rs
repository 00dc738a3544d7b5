// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client side of the device authorization flow.
//!
//! Used by headless tools: request a code pair, show the user code and URL,
//! then poll until a human approves it in a browser. The token is then saved
//! with [`credentials::Credentials`] and sent as a bearer token by later calls.

pub mod credentials;

pub use credentials::{Credentials, CredentialsError};

use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Extra delay after the server reports throttling.
const SLOW_DOWN: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("the device code expired before it was approved")]
    Expired,

    #[error("the server does not recognize this device code")]
    InvalidCode,

    #[error("gave up waiting for approval")]
    TimedOut,

    #[error("the server rejected the API token ({0})")]
    Unauthorized(String),

    #[error("unexpected response from server: {0}")]
    UnexpectedResponse(String),
}

/// Code pair issued by `/auth/device/code`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Approved(String),
    Pending,
    SlowDown,
}

/// The account a bearer token belongs to, from `/api/users/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub email: String,
    pub username: Option<String>,
    pub is_public: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct DeviceLoginClient {
    http: reqwest::Client,
    endpoint: String,
}

impl DeviceLoginClient {
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub async fn request_code(&self) -> Result<DeviceCode, ClientError> {
        let response = self
            .http
            .post(format!("{}/auth/device/code", self.endpoint))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::UnexpectedResponse(format!(
                "device code request returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    pub async fn poll_once(&self, device_code: &str) -> Result<PollStatus, ClientError> {
        let response = self
            .http
            .post(format!("{}/auth/device/token", self.endpoint))
            .json(&serde_json::json!({ "device_code": device_code }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(PollStatus::SlowDown);
        }

        let body: TokenBody = response.json().await?;
        match (status, body.status.as_deref(), body.error.as_deref()) {
            (StatusCode::OK, Some("approved"), _) => body
                .token
                .map(PollStatus::Approved)
                .ok_or_else(|| {
                    ClientError::UnexpectedResponse("approved response without token".into())
                }),
            (StatusCode::PRECONDITION_REQUIRED, _, _) | (_, Some("pending"), _) => {
                Ok(PollStatus::Pending)
            }
            (_, _, Some("expired_token")) => Err(ClientError::Expired),
            (_, _, Some("invalid_device_code")) => Err(ClientError::InvalidCode),
            (status, state, error) => Err(ClientError::UnexpectedResponse(format!(
                "status {status}, body status {state:?}, error {error:?}"
            ))),
        }
    }

    /// Poll at the server's interval until approved, rejected, or `max_wait`
    /// (capped at the code's own lifetime) elapses.
    ///
    /// Transport errors on individual polls are logged and retried.
    pub async fn wait_for_token(
        &self,
        code: &DeviceCode,
        max_wait: Duration,
    ) -> Result<String, ClientError> {
        let lifetime = Duration::from_secs(code.expires_in);
        let deadline = Instant::now() + max_wait.min(lifetime);
        let mut interval = Duration::from_secs(code.interval.max(1));

        loop {
            if Instant::now() + interval > deadline {
                return Err(ClientError::TimedOut);
            }
            tokio::time::sleep(interval).await;

            match self.poll_once(&code.device_code).await {
                Ok(PollStatus::Approved(token)) => return Ok(token),
                Ok(PollStatus::Pending) => {}
                Ok(PollStatus::SlowDown) => interval += SLOW_DOWN,
                Err(ClientError::Http(e)) => {
                    tracing::warn!(error = %e, "Poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch the account behind `token`.
    pub async fn fetch_profile(&self, token: &str) -> Result<Profile, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/users/me", self.endpoint))
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED => {
                let body: ErrorBody = response.json().await?;
                Err(ClientError::Unauthorized(
                    body.error.unwrap_or_else(|| "unauthorized".to_string()),
                ))
            }
            status => Err(ClientError::UnexpectedResponse(format!(
                "profile request returned {status}"
            ))),
        }
    }
}
