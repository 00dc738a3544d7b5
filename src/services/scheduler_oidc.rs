// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Verification of the OIDC ID tokens Cloud Scheduler attaches to its calls.

use crate::config::Config;
use anyhow::Context;
use axum::http::HeaderValue;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// Verified caller extracted from a valid token.
#[derive(Debug, Clone)]
pub struct SchedulerPrincipal {
    pub email: String,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub enum OidcError {
    /// Missing or invalid token, or claims that do not match.
    Forbidden(String),
    /// Could not fetch signing keys; the scheduler will retry.
    Transient(String),
}

enum KeySource {
    GoogleJwks {
        http_client: reqwest::Client,
        cache: RwLock<Option<KeyCache>>,
        refresh_lock: Mutex<()>,
    },
    Static {
        kid: String,
        key: Arc<DecodingKey>,
    },
}

struct KeyCache {
    keys_by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Checks that a request really comes from our Cloud Scheduler job.
pub struct SchedulerVerifier {
    audiences: Vec<String>,
    service_account_email: String,
    keys: KeySource,
}

impl SchedulerVerifier {
    /// Production verifier using Google's published signing keys.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed building OIDC HTTP client")?;

        let verifier = Self::with_keys(
            config,
            KeySource::GoogleJwks {
                http_client,
                cache: RwLock::new(None),
                refresh_lock: Mutex::new(()),
            },
        );

        tracing::info!(
            audiences = ?verifier.audiences,
            service_account = %verifier.service_account_email,
            "Initialized scheduler OIDC verifier"
        );
        Ok(verifier)
    }

    /// Verifier that trusts a single RSA key, for tests.
    pub fn new_with_static_key(
        config: &Config,
        kid: impl Into<String>,
        key: DecodingKey,
    ) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            anyhow::bail!("static OIDC kid must not be empty");
        }
        Ok(Self::with_keys(
            config,
            KeySource::Static {
                kid,
                key: Arc::new(key),
            },
        ))
    }

    fn with_keys(config: &Config, keys: KeySource) -> Self {
        let base = config.base_url.trim_end_matches('/');
        Self {
            // Cloud Scheduler defaults the audience to the target URL.
            audiences: vec![base.to_string(), format!("{base}/tasks/cleanup")],
            service_account_email: config.scheduler_service_account.clone(),
            keys,
        }
    }

    /// Verify the bearer token in an `Authorization` header.
    pub async fn verify(
        &self,
        auth_header: Option<&HeaderValue>,
    ) -> Result<SchedulerPrincipal, OidcError> {
        let token = extract_bearer_token(auth_header)?;

        let header = decode_header(token)
            .map_err(|e| OidcError::Forbidden(format!("invalid JWT header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(OidcError::Forbidden(format!(
                "unexpected JWT alg: {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| OidcError::Forbidden("missing JWT kid".to_string()))?;

        let key = self.key_for_kid(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&["https://accounts.google.com", "accounts.google.com"]);
        validation.set_audience(&self.audiences);
        validation.leeway = CLOCK_SKEW_SECS;

        let claims = decode::<IdTokenClaims>(token, key.as_ref(), &validation)
            .map_err(|e| OidcError::Forbidden(format!("JWT validation failed: {e}")))?
            .claims;

        let email = claims
            .email
            .ok_or_else(|| OidcError::Forbidden("missing email claim".to_string()))?;
        if email != self.service_account_email {
            return Err(OidcError::Forbidden(format!(
                "unexpected service account email: {email}"
            )));
        }
        if claims.email_verified != Some(true) {
            return Err(OidcError::Forbidden(
                "email_verified claim is not true".to_string(),
            ));
        }

        Ok(SchedulerPrincipal {
            email,
            subject: claims.sub,
        })
    }

    async fn key_for_kid(&self, kid: &str) -> Result<Arc<DecodingKey>, OidcError> {
        let (http_client, cache, refresh_lock) = match &self.keys {
            KeySource::Static {
                kid: static_kid,
                key,
            } => {
                return if kid == static_kid {
                    Ok(key.clone())
                } else {
                    Err(OidcError::Forbidden(format!("unknown JWT kid: {kid}")))
                };
            }
            KeySource::GoogleJwks {
                http_client,
                cache,
                refresh_lock,
            } => (http_client, cache, refresh_lock),
        };

        if let Some(key) = cached_key(cache, kid).await {
            return Ok(key);
        }

        // Google rotates keys; an unknown kid forces one refetch.
        let _guard = refresh_lock.lock().await;
        if let Some(key) = cached_key(cache, kid).await {
            return Ok(key);
        }

        let fresh = fetch_jwks(http_client).await?;
        let key = fresh.keys_by_kid.get(kid).cloned();
        *cache.write().await = Some(fresh);

        key.ok_or_else(|| OidcError::Forbidden(format!("JWT kid not found in JWKS: {kid}")))
    }
}

async fn cached_key(cache: &RwLock<Option<KeyCache>>, kid: &str) -> Option<Arc<DecodingKey>> {
    let now = Instant::now();
    cache
        .read()
        .await
        .as_ref()
        .filter(|entry| entry.expires_at > now)
        .and_then(|entry| entry.keys_by_kid.get(kid))
        .cloned()
}

async fn fetch_jwks(http_client: &reqwest::Client) -> Result<KeyCache, OidcError> {
    tracing::debug!("Refreshing Google JWKS cache");

    let response = http_client
        .get(GOOGLE_JWKS_URL)
        .send()
        .await
        .map_err(|e| OidcError::Transient(format!("JWKS request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(OidcError::Transient(format!(
            "JWKS request returned status {}",
            response.status()
        )));
    }

    let ttl = response
        .headers()
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_cache_control_max_age)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CACHE_TTL);

    let jwks: Jwks = response
        .json()
        .await
        .map_err(|e| OidcError::Transient(format!("invalid JWKS JSON: {e}")))?;

    let keys_by_kid: HashMap<String, Arc<DecodingKey>> = jwks
        .keys
        .into_iter()
        .filter(|jwk| jwk.kty == "RSA" && jwk.alg.as_deref().unwrap_or("RS256") == "RS256")
        .filter_map(|jwk| match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(key) => Some((jwk.kid, Arc::new(key))),
            Err(e) => {
                tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA JWKS key");
                None
            }
        })
        .collect();

    if keys_by_kid.is_empty() {
        return Err(OidcError::Transient(
            "JWKS response did not include any usable RSA keys".to_string(),
        ));
    }

    Ok(KeyCache {
        keys_by_kid,
        expires_at: Instant::now() + ttl,
    })
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
}

fn extract_bearer_token(auth_header: Option<&HeaderValue>) -> Result<&str, OidcError> {
    let value = auth_header
        .ok_or_else(|| OidcError::Forbidden("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| OidcError::Forbidden("invalid Authorization header".to_string()))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(OidcError::Forbidden(
            "Authorization header must be a Bearer token".to_string(),
        )),
    }
}

fn parse_cache_control_max_age(value: &str) -> Option<u64> {
    value
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|raw| raw.trim_matches('"').parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_control_max_age() {
        assert_eq!(
            parse_cache_control_max_age("public, max-age=3600"),
            Some(3600)
        );
        assert_eq!(parse_cache_control_max_age("max-age=\"120\""), Some(120));
        assert_eq!(parse_cache_control_max_age("public, immutable"), None);
        assert_eq!(parse_cache_control_max_age("max-age=abc"), None);
    }

    #[test]
    fn bearer_extraction() {
        assert!(matches!(
            extract_bearer_token(None),
            Err(OidcError::Forbidden(_))
        ));
        let basic = HeaderValue::from_static("Basic abc");
        assert!(extract_bearer_token(Some(&basic)).is_err());
        let empty = HeaderValue::from_static("Bearer ");
        assert!(extract_bearer_token(Some(&empty)).is_err());
        let ok = HeaderValue::from_static("Bearer abc.def.ghi");
        assert_eq!(extract_bearer_token(Some(&ok)).unwrap(), "abc.def.ghi");
    }
}
