// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential generation and password hashing.

use crate::error::AppError;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::OnceLock;

/// Characters used in user codes. No `0`/`O`, `1`/`I` to keep codes easy to
/// retype. 32 symbols, so a random byte maps onto it without bias.
const USER_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const USER_CODE_LEN: usize = 8;

/// Fill an array with cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], AppError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("system RNG failure")))?;
    Ok(bytes)
}

/// Opaque bearer token: 32 random bytes, hex encoded.
pub fn generate_api_token() -> Result<String, AppError> {
    Ok(hex::encode(random_bytes::<32>()?))
}

/// Device code: 32 random bytes, hex encoded.
pub fn generate_device_code() -> Result<String, AppError> {
    Ok(hex::encode(random_bytes::<32>()?))
}

/// User code in its display form, `XXXX-XXXX`.
pub fn generate_user_code() -> Result<String, AppError> {
    let bytes = random_bytes::<USER_CODE_LEN>()?;
    let raw: String = bytes
        .iter()
        .map(|b| USER_CODE_ALPHABET[(*b as usize) % USER_CODE_ALPHABET.len()] as char)
        .collect();
    Ok(format!("{}-{}", &raw[..4], &raw[4..]))
}

/// Normalize a typed user code to the stored form.
///
/// Whitespace and dashes are dropped and letters uppercased, so
/// `abcd efgh`, `ABCD-EFGH` and `abcdefgh` all compare equal. Returns `None`
/// for empty input; other malformed input is returned as-is (uppercased) and
/// must be checked with [`is_user_code`] before it goes near the store.
pub fn normalize_user_code(input: &str) -> Option<String> {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if compact.is_empty() {
        return None;
    }
    if compact.len() == USER_CODE_LEN && compact.is_ascii() {
        return Some(format!("{}-{}", &compact[..4], &compact[4..]));
    }
    Some(compact)
}

/// Whether `code` is a user code in stored form: `XXXX-XXXX` over the
/// user-code alphabet.
pub fn is_user_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == USER_CODE_LEN + 1
        && bytes[4] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || USER_CODE_ALPHABET.contains(b))
}

/// Whether `code` has the shape of an issued device code: 64 lowercase hex
/// characters.
pub fn is_device_code(code: &str) -> bool {
    code.len() == 64 && code.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Uniform random value in `0..bound` (bound must be non-zero).
pub fn random_below(bound: u32) -> Result<u32, AppError> {
    let value = u64::from_be_bytes(random_bytes::<8>()?);
    Ok((value % u64::from(bound)) as u32)
}

/// Hash a password with Argon2id and a random salt, returning a PHC string.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::encode_b64(&random_bytes::<16>()?)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("salt encoding failed: {e}")))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
}

/// Verify a password against a stored PHC string.
///
/// An unparseable digest verifies as `false`.
pub fn verify_password(password: &str, digest: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(digest) else {
        tracing::warn!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Spend the same work as a real verification when there is no user, so
/// response time does not reveal whether an email is registered.
pub fn verify_against_dummy(password: &str) {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

    let dummy = DUMMY_HASH.get_or_init(|| hash_password("dummy-password-for-timing").ok());
    if let Some(digest) = dummy {
        let _ = verify_password(password, digest);
    }
}

/// Run Argon2 work on the blocking pool so it does not stall a runtime worker.
async fn on_blocking_pool<T, F>(work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password task failed: {e}")))
}

/// [`hash_password`] on the blocking pool.
pub async fn spawn_hash_password(password: String) -> Result<String, AppError> {
    on_blocking_pool(move || hash_password(&password)).await?
}

/// [`verify_password`] on the blocking pool. With no digest (unknown user)
/// the dummy verification runs instead and the result is `false`.
pub async fn spawn_verify_password(password: String, digest: Option<String>) -> Result<bool, AppError> {
    on_blocking_pool(move || match digest {
        Some(digest) => verify_password(&password, &digest),
        None => {
            verify_against_dummy(&password);
            false
        }
    })
    .await
}
