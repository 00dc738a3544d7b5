// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Registration, login and bearer token regeneration.

use crate::db::Store;
use crate::error::AppError;
use crate::models::{CreateUserOutcome, NewUser, User};
use crate::services::credentials;
use crate::time_utils::format_unix_secs;
use serde::Deserialize;
use validator::{Validate, ValidationError};

/// Usernames that would collide with routes or look official.
const RESERVED_USERNAMES: &[&str] = &[
    "admin", "api", "auth", "device", "login", "logout", "me", "register", "root", "settings",
    "static", "system", "tasks", "users",
];

/// Registration input, after normalization.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Registration {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[validate(custom(function = "validate_username"))]
    pub username: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8 to 128 characters"))]
    pub password: String,
}

impl Registration {
    /// Trim and lowercase email and username. Passwords are left alone.
    pub fn normalized(email: &str, username: &str, password: &str) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            username: username.trim().to_lowercase(),
            password: password.to_string(),
        }
    }

    /// First failing field, checked in form order.
    fn first_error(&self) -> Option<FieldError> {
        let errors = self.validate().err()?;
        let by_field = errors.field_errors();

        ["email", "username", "password"].into_iter().find_map(|field| {
            let error = by_field.get(field)?.first()?;
            let message = error
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("Invalid {field}"));
            Some(FieldError { field, message })
        })
    }
}

fn validate_username(username: &str) -> Result<(), ValidationError> {
    let len = username.chars().count();
    if !(3..=20).contains(&len) {
        return Err(ValidationError::new("length")
            .with_message("Username must be 3 to 20 characters".into()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(ValidationError::new("charset").with_message(
            "Username may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    if RESERVED_USERNAMES.contains(&username) {
        return Err(ValidationError::new("reserved").with_message("Username is reserved".into()));
    }
    Ok(())
}

/// A problem with one form field, shown next to the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum RegistrationOutcome {
    Registered(User),
    Rejected(FieldError),
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Success(User),
    /// Wrong password or unknown email; callers must not distinguish them.
    InvalidCredentials,
}

/// Create an account with a fresh bearer token.
pub async fn register(
    store: &dyn Store,
    registration: Registration,
    now: i64,
) -> Result<RegistrationOutcome, AppError> {
    if let Some(error) = registration.first_error() {
        return Ok(RegistrationOutcome::Rejected(error));
    }

    let new_user = NewUser {
        password_hash: credentials::spawn_hash_password(registration.password).await?,
        api_token: credentials::generate_api_token()?,
        api_token_issued_at: now,
        created_at: format_unix_secs(now),
        email: registration.email,
        username: registration.username,
    };

    Ok(match store.create_user(new_user).await? {
        CreateUserOutcome::Created(user) => {
            tracing::info!(user_id = user.id, "Registered new user");
            RegistrationOutcome::Registered(user)
        }
        CreateUserOutcome::EmailTaken => RegistrationOutcome::Rejected(FieldError {
            field: "email",
            message: "Email is already registered".to_string(),
        }),
        CreateUserOutcome::UsernameTaken => RegistrationOutcome::Rejected(FieldError {
            field: "username",
            message: "Username is already taken".to_string(),
        }),
    })
}

/// Check an email/password pair.
///
/// An unknown email still costs one password verification. Argon2 runs on
/// the blocking pool.
pub async fn login(store: &dyn Store, email: &str, password: &str) -> Result<LoginOutcome, AppError> {
    let email = email.trim().to_lowercase();

    let Some(user) = store.find_user_by_email(&email).await? else {
        credentials::spawn_verify_password(password.to_string(), None).await?;
        tracing::info!("Login failed");
        return Ok(LoginOutcome::InvalidCredentials);
    };

    let digest = Some(user.password_hash.clone());
    if credentials::spawn_verify_password(password.to_string(), digest).await? {
        tracing::info!(user_id = user.id, "Login succeeded");
        Ok(LoginOutcome::Success(user))
    } else {
        tracing::info!(user_id = user.id, "Login failed");
        Ok(LoginOutcome::InvalidCredentials)
    }
}

/// Replace the user's bearer token. The old token stops working immediately.
pub async fn regenerate_token(store: &dyn Store, user_id: u64, now: i64) -> Result<User, AppError> {
    let token = credentials::generate_api_token()?;
    let user = store
        .replace_api_token(user_id, &token, now)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

    tracing::info!(user_id, "Regenerated API token");
    Ok(user)
}
