// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! On Cloud Run the signing key is injected as an environment variable via a
//! Secret Manager binding, so everything is read once at startup.

use std::env;

/// Session lifetime, shared by the JWT `exp` claim and the cookie `Max-Age`.
pub const SESSION_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// Device authorizations survive this long past expiry before cleanup may
/// delete them, so a client polling right at the deadline still gets
/// `expired_token` rather than `invalid_device_code`.
pub const DEVICE_CODE_GRACE_SECS: i64 = 60 * 60;

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

/// A fixed-window request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub window_secs: i64,
}

impl RateLimit {
    pub const fn new(max: u32, window_secs: i64) -> Self {
        Self { max, window_secs }
    }

    /// Parse `"<max>/<window_secs>"`, e.g. `"10/300"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (max, window) = raw.trim().split_once('/')?;
        let max = max.trim().parse().ok()?;
        let window_secs: i64 = window.trim().parse().ok()?;
        if window_secs <= 0 {
            return None;
        }
        Some(Self { max, window_secs })
    }
}

/// Per-route rate limit budgets.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub login: RateLimit,
    pub register: RateLimit,
    pub device_code: RateLimit,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login: RateLimit::new(10, 300),
            register: RateLimit::new(5, 3600),
            device_code: RateLimit::new(10, 600),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// Public origin of this service, e.g. `https://scores.example.com`
    pub base_url: String,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    /// Storage backend
    pub store_backend: StoreBackend,
    /// Service account Cloud Scheduler signs its OIDC tokens as
    pub scheduler_service_account: String,

    pub rate_limits: RateLimits,
    /// Admit requests when the counter store is unreachable
    pub rate_limit_fail_open: bool,
    /// Proxies in front of us that append to `X-Forwarded-For`. With 0 the
    /// header is ignored and the peer address is the client.
    pub trusted_proxy_hops: usize,

    /// Maximum age of a bearer token before it must be regenerated
    pub api_token_max_age_secs: i64,
    pub device_code_ttl_secs: i64,
    pub device_poll_interval_secs: i64,
    /// Each poll runs an inline cleanup with probability 1/N (0 disables)
    pub cleanup_probability_denominator: u32,

    // --- Secrets ---
    /// HMAC key for session tokens and CSRF tokens (raw bytes)
    pub session_signing_key: Vec<u8>,
}

impl Config {
    /// Deterministic configuration for tests.
    pub fn test_default() -> Self {
        Self {
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            store_backend: StoreBackend::Memory,
            scheduler_service_account: "devicelink-scheduler@test-project.iam.gserviceaccount.com"
                .to_string(),
            rate_limits: RateLimits::default(),
            rate_limit_fail_open: false,
            trusted_proxy_hops: 0,
            api_token_max_age_secs: 90 * 24 * 60 * 60,
            device_code_ttl_secs: 600,
            device_poll_interval_secs: 5,
            cleanup_probability_denominator: 0,
            session_signing_key: b"test_session_key_32_bytes_min!!!".to_vec(),
        }
    }

    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let gcp_project_id = env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string());

        let store_backend = match env::var("STORE").as_deref() {
            Err(_) | Ok("firestore") => StoreBackend::Firestore,
            Ok("memory") => StoreBackend::Memory,
            Ok(_) => return Err(ConfigError::Invalid("STORE")),
        };

        let session_signing_key = env::var("SESSION_SIGNING_KEY")
            .map_err(|_| ConfigError::Missing("SESSION_SIGNING_KEY"))?
            .into_bytes();
        if session_signing_key.len() < 32 {
            return Err(ConfigError::Invalid("SESSION_SIGNING_KEY"));
        }

        let defaults = RateLimits::default();

        Ok(Self {
            port: parse_or("PORT", 8080)?,
            base_url: env::var("BASE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            scheduler_service_account: env::var("SCHEDULER_SERVICE_ACCOUNT").unwrap_or_else(|_| {
                format!("devicelink-scheduler@{gcp_project_id}.iam.gserviceaccount.com")
            }),
            gcp_project_id,
            store_backend,
            rate_limits: RateLimits {
                login: rate_limit_or("RATE_LIMIT_LOGIN", defaults.login)?,
                register: rate_limit_or("RATE_LIMIT_REGISTER", defaults.register)?,
                device_code: rate_limit_or("RATE_LIMIT_DEVICE_CODE", defaults.device_code)?,
            },
            rate_limit_fail_open: parse_or("RATE_LIMIT_FAIL_OPEN", false)?,
            trusted_proxy_hops: parse_or("TRUSTED_PROXY_HOPS", 0)?,
            api_token_max_age_secs: parse_or::<i64>("API_TOKEN_MAX_AGE_DAYS", 90)? * 24 * 60 * 60,
            device_code_ttl_secs: parse_or("DEVICE_CODE_TTL_SECS", 600)?,
            device_poll_interval_secs: parse_or("DEVICE_POLL_INTERVAL_SECS", 5)?,
            cleanup_probability_denominator: parse_or("CLEANUP_PROBABILITY_DENOMINATOR", 100)?,
            session_signing_key,
        })
    }

    /// Origin (`scheme://host[:port]`) of the public base URL.
    pub fn public_origin(&self) -> &str {
        origin_of(&self.base_url)
    }

    /// Cookies get the `Secure` attribute unless we are served over plain HTTP
    /// (local development).
    pub fn cookies_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

/// Strip any path from a URL, leaving `scheme://authority`.
pub fn origin_of(url: &str) -> &str {
    let url = url.trim_end_matches('/');
    let Some(scheme_end) = url.find("://") else {
        return url;
    };
    let authority_start = scheme_end + 3;
    match url[authority_start..].find('/') {
        Some(path_start) => &url[..authority_start + path_start],
        None => url,
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn rate_limit_or(name: &'static str, default: RateLimit) -> Result<RateLimit, ConfigError> {
    match env::var(name) {
        Ok(raw) => RateLimit::parse(&raw).ok_or(ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        env::set_var("SESSION_SIGNING_KEY", "test_session_key_32_bytes_min!!!");
        env::set_var("RATE_LIMIT_LOGIN", "3/60");
        env::set_var("BASE_URL", "https://scores.example.com/");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.port, 8080);
        assert_eq!(config.base_url, "https://scores.example.com");
        assert_eq!(config.rate_limits.login, RateLimit::new(3, 60));
        assert_eq!(config.rate_limits.register, RateLimit::new(5, 3600));
        assert_eq!(config.api_token_max_age_secs, 90 * 86400);
        assert_eq!(config.trusted_proxy_hops, 0);
        assert!(config.cookies_secure());
    }

    #[test]
    fn rate_limit_parse() {
        assert_eq!(RateLimit::parse("10/300"), Some(RateLimit::new(10, 300)));
        assert_eq!(RateLimit::parse(" 1 / 1 "), Some(RateLimit::new(1, 1)));
        assert_eq!(RateLimit::parse("10"), None);
        assert_eq!(RateLimit::parse("10/0"), None);
        assert_eq!(RateLimit::parse("x/5"), None);
    }

    #[test]
    fn origin_strips_path() {
        assert_eq!(origin_of("https://a.example.com/app/"), "https://a.example.com");
        assert_eq!(origin_of("http://localhost:8080"), "http://localhost:8080");
        assert_eq!(origin_of("http://localhost:8080/"), "http://localhost:8080");
    }
}
