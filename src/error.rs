// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Why a bearer token was not accepted.
///
/// The reason is machine-readable; the accompanying message is deliberately
/// the same for every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerRejection {
    MissingHeader,
    InvalidFormat,
    InvalidToken,
    TokenExpired,
}

impl BearerRejection {
    pub fn reason(self) -> &'static str {
        match self {
            BearerRejection::MissingHeader => "missing_header",
            BearerRejection::InvalidFormat => "invalid_format",
            BearerRejection::InvalidToken => "invalid_token",
            BearerRejection::TokenExpired => "token_expired",
        }
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Bearer authentication failed: {}", .0.reason())]
    Bearer(BearerRejection),

    #[error("Forbidden")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: i64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None, None),
            AppError::Bearer(rejection) => (
                StatusCode::UNAUTHORIZED,
                rejection.reason(),
                Some("Authentication failed"),
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", None, None),
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "not_found", None, Some(msg.clone()))
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", None, Some(msg.clone()))
            }
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                Some("Too many requests, try again later"),
                None,
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None, None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None, None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message: message.map(str::to_string),
            details,
        };

        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
